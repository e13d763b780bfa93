//! Metadata ingestion: the one-shot ZTOC → KV projection.
//!
//! A fixed sequence of phases, each consuming the previous one's output:
//! root creation, tree construction, and extent materialization.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::IngestConfig;
use crate::error::Error;
use crate::kv::paths::BucketPath;
use crate::kv::store::{BatchTxn, KvStore};
use crate::metadata::attr::{bump_num_link, read_attr, type_bits, write_attr, AttributeRecord};
use crate::metadata::extent::{attach_child, write_extent, write_ztoc_record, ExtentDescriptor, ZtocRecord};
use crate::metadata::fsid;
use crate::metadata::ztoc::{EntryType, Ztoc, ZtocEntry};
use crate::metrics::{MetricsSink, TelemetryCallback};

/// The root inode id. Ids are allocated monotonically from 1.
pub const ROOT_ID: u32 = 1;

/// Normalize a ZTOC entry path: collapse `//`, drop `.` segments, reject
/// `..`, and strip the leading slash.
pub fn normalize_path(raw: &str) -> Result<String, Error> {
    let mut segments = Vec::new();
    for seg in raw.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                return Err(Error::IngestFailed(format!(
                    "path escapes root via '..': {raw:?}"
                )))
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

struct IdAllocator {
    next: Mutex<u32>,
}

impl IdAllocator {
    fn starting_at(next: u32) -> Self {
        Self { next: Mutex::new(next) }
    }

    fn alloc(&self) -> Result<u32, Error> {
        let mut guard = self.next.lock();
        if *guard == u32::MAX {
            return Err(Error::IdExhausted);
        }
        let id = *guard;
        *guard += 1;
        Ok(id)
    }
}

/// In-memory index built during ingestion: the source of truth for
/// intra-ingest lookups.
#[derive(Default)]
struct IngestIndex {
    path_to_id: HashMap<String, u32>,
    is_dir: HashMap<u32, bool>,
}

/// Ingest `ztoc` into `store`, returning the newly allocated fsID.
///
/// Runs all three phases synchronously on the calling thread; [`ingest_phase1`]
/// and [`ingest_tree`] split the same work for callers (the metadata-reader
/// factory in `store.rs`) that want the fast root-only phase to return
/// before tree construction finishes.
pub fn ingest(
    store: &impl KvStore,
    ztoc: &Ztoc,
    config: &IngestConfig,
    metrics: &dyn MetricsSink,
    telemetry: Option<&dyn TelemetryCallback>,
) -> Result<String, Error> {
    let started = Instant::now();
    let (fs_id, ztoc_id) = ingest_phase1(store, ztoc, config)?;
    tracing::debug!(fs_id = %fs_id, "reserved fsID namespace");

    let result = ingest_tree(store, &fs_id, &ztoc_id, ztoc);
    if let Err(e) = &result {
        tracing::error!(fs_id = %fs_id, error = %e, "ingest failed, discarding namespace");
        let _ = store.delete_namespace(&BucketPath::fs(&fs_id));
    }

    if let Some(cb) = telemetry {
        cb.on_span_start("init-metadata-store-latency", started);
    }
    let _ = metrics; // reserved for future ingest-time counters; see DESIGN.md

    result.map(|()| fs_id)
}

/// Phase 1: reserve a collision-free fsID, create the namespace's top-level
/// buckets, write the root inode, and record the ZTOC's own backing record.
/// Fast and synchronous by construction — it does one pass over no caller
/// data — which is what lets
/// [`MetadataReader::root_attr`](crate::metadata::reader::MetadataReader::root_attr)
/// skip the initialization barrier: by the time a caller holds a fsID, this
/// phase has already committed.
pub fn ingest_phase1(
    store: &impl KvStore,
    ztoc: &Ztoc,
    config: &IngestConfig,
) -> Result<(String, String), Error> {
    let fs_id = fsid::reserve_fs_id(store, config)?;

    store.batch(|txn| {
        txn.create_bucket(&BucketPath::ztocs(&fs_id))?;
        txn.create_bucket(&BucketPath::metadata_root(&fs_id))?;
        txn.create_bucket(&BucketPath::nodes_root(&fs_id))?;
        write_attr(txn, &fs_id, ROOT_ID, &AttributeRecord::root())?;
        Ok(())
    })?;

    let ztoc_id = format!("{fs_id}-ztoc");
    store.batch(|txn| {
        write_ztoc_record(
            txn,
            &fs_id,
            &ztoc_id,
            &ZtocRecord {
                index_bytes: ztoc.index_bytes.clone(),
                compressed_layer_size: ztoc.compressed_layer_size,
                max_span_id: ztoc.max_span_id,
                version: ztoc.version,
            },
        )
    })?;

    Ok((fs_id, ztoc_id))
}

/// Phases 2 and 3: tree construction followed by sorted extent
/// materialization. Separated from [`ingest_phase1`] so it can run on a
/// background thread while callers already hold a fsID and root attributes.
pub fn ingest_tree(store: &impl KvStore, fs_id: &str, ztoc_id: &str, ztoc: &Ztoc) -> Result<(), Error> {
    let mut index = IngestIndex::default();
    index.path_to_id.insert(String::new(), ROOT_ID);
    index.is_dir.insert(ROOT_ID, true);
    let allocator = IdAllocator::starting_at(ROOT_ID + 1);

    let mut pending_extents: Vec<(u32, ExtentDescriptor)> = Vec::new();

    // Phase 2 — tree construction, one batched transaction: all directory
    // operations run inside it; the in-memory index is authoritative for
    // intra-ingest lookups.
    store.batch(|txn| {
        for entry in &ztoc.entries {
            ingest_entry(txn, fs_id, ztoc_id, entry, &mut index, &allocator, &mut pending_extents)?;
        }
        Ok(())
    })?;

    // Phase 3 — extent materialization, sorted by id for sequential,
    // append-only writes.
    pending_extents.sort_by_key(|(id, _)| *id);
    store.batch(|txn| {
        for (id, extent) in &pending_extents {
            write_extent(txn, fs_id, *id, extent)?;
        }
        Ok(())
    })?;

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn ingest_entry(
    txn: &mut dyn BatchTxn,
    fs_id: &str,
    ztoc_id: &str,
    entry: &ZtocEntry,
    index: &mut IngestIndex,
    allocator: &IdAllocator,
    pending_extents: &mut Vec<(u32, ExtentDescriptor)>,
) -> Result<(), Error> {
    let path = normalize_path(&entry.name)?;
    if path.is_empty() {
        // An empty name resolves to the root id; nothing further to do for it.
        return Ok(());
    }

    let (parent_path, base) = split_parent(&path);
    let parent_id = ensure_parent_chain(txn, fs_id, parent_path, index, allocator)?;
    let is_forward_reference = index.path_to_id.contains_key(&path);

    match entry.entry_type {
        EntryType::Hardlink => {
            let target = entry
                .linkname
                .as_ref()
                .ok_or_else(|| Error::IngestFailed(format!("hardlink {path} missing linkname")))?;
            let target_path = normalize_path(target)?;
            let target_id = *index
                .path_to_id
                .get(&target_path)
                .ok_or_else(|| Error::IngestFailed(format!("hardlink {path} -> unresolved target {target}")))?;
            bump_num_link(txn, fs_id, target_id, 1)?;
            index.path_to_id.insert(path, target_id);
            attach_child(txn, fs_id, parent_id, base, target_id)?;
        }
        EntryType::Directory => {
            let mode = crate::metadata::attr::S_IFDIR | entry.perm;
            let id = get_or_create_dir(txn, fs_id, index, allocator, &path, mode, entry)?;
            if !is_forward_reference {
                attach_child(txn, fs_id, parent_id, base, id)?;
            }
        }
        _ => {
            let id = allocator.alloc()?;
            let mode = type_bits(entry.entry_type) | entry.perm;
            let attr = AttributeRecord {
                size: entry.size,
                mode,
                num_link: 1,
                mod_time_unix: entry.mod_time_unix,
                uid: entry.uid,
                gid: entry.gid,
                dev_major: entry.dev_major,
                dev_minor: entry.dev_minor,
                link_name: entry.linkname.clone(),
                xattrs: entry.xattrs.clone(),
            };
            write_attr(txn, fs_id, id, &attr)?;
            index.path_to_id.insert(path, id);
            index.is_dir.insert(id, false);
            attach_child(txn, fs_id, parent_id, base, id)?;

            if let Some(extent_input) = entry.extent {
                pending_extents.push((
                    id,
                    ExtentDescriptor {
                        uncompressed_offset: extent_input.uncompressed_offset,
                        uncompressed_size: extent_input.uncompressed_size,
                        span_start: extent_input.span_start,
                        span_end: extent_input.span_end,
                        first_span_has_bits: extent_input.first_span_has_bits,
                        ztoc_id: ztoc_id.to_string(),
                    },
                ));
            }
        }
    }

    // A directory child increments the parent's link count: a directory's
    // link count equals 2 + number of directory children. Skipped for
    // forward references: the implicit
    // intermediate-directory creation already accounted for this child when
    // it first attached it.
    if matches!(entry.entry_type, EntryType::Directory) && !is_forward_reference {
        bump_num_link(txn, fs_id, parent_id, 1)?;
    }

    Ok(())
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Resolve (creating as needed) every intermediate directory in
/// `parent_path`, returning the immediate parent's inode id. Missing
/// intermediate directories are created recursively with
/// `mode=dir|0755, numLink=2`.
fn ensure_parent_chain(
    txn: &mut dyn BatchTxn,
    fs_id: &str,
    parent_path: &str,
    index: &mut IngestIndex,
    allocator: &IdAllocator,
) -> Result<u32, Error> {
    if parent_path.is_empty() {
        return Ok(ROOT_ID);
    }
    let mut current_id = ROOT_ID;
    let mut current_path = String::new();
    for component in parent_path.split('/') {
        if !current_path.is_empty() {
            current_path.push('/');
        }
        current_path.push_str(component);

        if let Some(&existing) = index.path_to_id.get(&current_path) {
            current_id = existing;
            continue;
        }

        let id = allocator.alloc()?;
        let attr = AttributeRecord {
            mode: crate::metadata::attr::S_IFDIR | 0o755,
            num_link: 2,
            ..AttributeRecord::root()
        };
        write_attr(txn, fs_id, id, &attr)?;
        attach_child(txn, fs_id, current_id, component, id)?;
        bump_num_link(txn, fs_id, current_id, 1)?;

        index.path_to_id.insert(current_path.clone(), id);
        index.is_dir.insert(id, true);
        current_id = id;
    }
    Ok(current_id)
}

/// Resolve a directory entry against a possible forward reference: the
/// last-declared directory mode wins, while accumulated nlink is preserved
/// (see DESIGN.md).
fn get_or_create_dir(
    txn: &mut dyn BatchTxn,
    fs_id: &str,
    index: &mut IngestIndex,
    allocator: &IdAllocator,
    path: &str,
    mode: u32,
    entry: &ZtocEntry,
) -> Result<u32, Error> {
    if let Some(&id) = index.path_to_id.get(path) {
        let mut attr = read_attr(&*txn, fs_id, id)?;
        attr.mode = mode;
        attr.uid = entry.uid;
        attr.gid = entry.gid;
        attr.mod_time_unix = entry.mod_time_unix;
        attr.xattrs = entry.xattrs.clone();
        write_attr(txn, fs_id, id, &attr)?;
        index.is_dir.insert(id, true);
        return Ok(id);
    }
    let id = allocator.alloc()?;
    let attr = AttributeRecord {
        size: 0,
        mode,
        num_link: 2,
        mod_time_unix: entry.mod_time_unix,
        uid: entry.uid,
        gid: entry.gid,
        dev_major: 0,
        dev_minor: 0,
        link_name: None,
        xattrs: entry.xattrs.clone(),
    };
    write_attr(txn, fs_id, id, &attr)?;
    index.path_to_id.insert(path.to_string(), id);
    index.is_dir.insert(id, true);
    Ok(id)
}
