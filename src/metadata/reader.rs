//! Metadata query surface: the read side of the store, exposed once
//! ingestion has signaled its init barrier.

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::barrier::InitBarrier;
use crate::error::Error;
use crate::file_reader::{ExtractReader, ReaderAt};
use crate::kv::paths::BucketPath;
use crate::kv::store::KvStore;
use crate::metadata::attr::{read_attr, AttributeRecord};
use crate::metadata::extent::{foreach_child, lookup_child, read_extent, read_ztoc_record, ExtentDescriptor, ZtocRecord};
use crate::metadata::ingest::ROOT_ID;
use crate::span::{FileExtractor, SectionReader};

/// Read-side handle into one fsID namespace. Cheap to clone (shares the
/// underlying store and barrier); [`MetadataReader::clone_with_section`] is
/// the `clone`-onto-a-new-payload-source operation.
pub struct MetadataReader<S> {
    store: Arc<S>,
    fs_id: String,
    ztoc_id: String,
    barrier: Arc<InitBarrier>,
    section: Arc<dyn SectionReader>,
    extractor: Arc<dyn FileExtractor>,
}

impl<S: KvStore> MetadataReader<S> {
    pub fn new(
        store: Arc<S>,
        fs_id: String,
        ztoc_id: String,
        barrier: Arc<InitBarrier>,
        section: Arc<dyn SectionReader>,
        extractor: Arc<dyn FileExtractor>,
    ) -> Self {
        Self { store, fs_id, ztoc_id, barrier, section, extractor }
    }

    pub fn fs_id(&self) -> &str {
        &self.fs_id
    }

    pub fn ztoc_id(&self) -> &str {
        &self.ztoc_id
    }

    pub fn section(&self) -> &Arc<dyn SectionReader> {
        &self.section
    }

    pub fn root_id(&self) -> u32 {
        ROOT_ID
    }

    /// Root attributes bypass the initialization barrier: the root's
    /// attributes are known before the rest of the tree has been ingested
    /// and need not block on it.
    ///
    /// This is only safe because `ingest` writes the root inode inside its
    /// Phase 1 batch before the fsID namespace is visible to any reader
    /// holding this `fs_id`/`ztoc_id` pair — by the time a caller can
    /// construct a `MetadataReader`, Phase 1 has already committed.
    pub fn root_attr(&self) -> Result<AttributeRecord, Error> {
        self.store.view(|txn| read_attr(txn, &self.fs_id, ROOT_ID))
    }

    pub fn get_attr(&self, ino: u32) -> Result<AttributeRecord, Error> {
        self.barrier.wait()?;
        self.store.view(|txn| read_attr(txn, &self.fs_id, ino))
    }

    pub fn get_child(&self, parent: u32, base: &str) -> Result<Option<u32>, Error> {
        self.barrier.wait()?;
        self.store.view(|txn| lookup_child(txn, &self.fs_id, parent, base))
    }

    pub fn foreach_child(&self, parent: u32, mut f: impl FnMut(&str, u32) -> ControlFlow<()>) -> Result<(), Error> {
        self.barrier.wait()?;
        self.store.view(|txn| foreach_child(txn, &self.fs_id, parent, &mut f))
    }

    /// spec §4.3/§6 `open-file(id)`: a random-access byte view of the file's
    /// uncompressed contents, served through this reader's [`FileExtractor`]
    /// over its compressed-layer [`SectionReader`]. This is the direct path —
    /// the one a caller holding only a `MetadataReader` has; `Reader`
    /// (store.rs) additionally has a span manager and serves the same inode
    /// through a cached, remote-capable [`crate::file_reader::LayerReader`]
    /// instead.
    pub fn open_file(&self, ino: u32) -> Result<Box<dyn ReaderAt>, Error> {
        let (extent, ztoc) = self.file_extent(ino)?;
        Ok(Box::new(ExtractReader::new(Arc::clone(&self.section), Arc::clone(&self.extractor), extent, ztoc)))
    }

    /// Resolve a regular file's extent descriptor plus its backing ZTOC
    /// record without constructing a reader over it. Used by `Reader`
    /// (store.rs), which builds a span-manager-backed `LayerReader` from the
    /// same extent instead of going through the file extractor.
    pub(crate) fn file_extent(&self, ino: u32) -> Result<(ExtentDescriptor, ZtocRecord), Error> {
        self.barrier.wait()?;
        self.store.view(|txn| {
            let attr = read_attr(txn, &self.fs_id, ino)?;
            if !attr.is_regular() {
                return Err(Error::NotRegularFile { ino });
            }
            let extent = read_extent(txn, &self.fs_id, ino)?
                .ok_or_else(|| Error::not_found("open_file", format!("extent for ino {ino}")))?;
            let ztoc = read_ztoc_record(txn, &self.fs_id, &extent.ztoc_id)?;
            Ok((extent, ztoc))
        })
    }

    /// Counts the `nodes/<ino>` sub-buckets under this fsID's `nodes` bucket
    /// — one per ingested inode, since each inode's attributes live in its
    /// own sub-bucket (`attr::write_attr`) rather than as an entry of
    /// `nodes` itself.
    pub fn num_of_nodes(&self) -> Result<usize, Error> {
        self.barrier.wait()?;
        self.store.count_subbuckets(&BucketPath::nodes_root(&self.fs_id))
    }

    /// spec §3 "Lifecycle": "Close deletes the fsID namespace from the KV
    /// store — the metadata is ephemeral to the process that created it."
    /// Idempotent: deleting an already-deleted (or never-created) namespace
    /// is a no-op in both `KvStore` implementations.
    pub fn close(&self) -> Result<(), Error> {
        self.store.delete_namespace(&BucketPath::fs(&self.fs_id))
    }

    /// Share the same store, fsID, and extractor with a new reader handle,
    /// pointed at a new compressed-layer section reader: the clone shares
    /// the underlying KV store and fsID but can be read concurrently with a
    /// different payload source. It blocks on the same barrier its parent
    /// does, since it observes the same ingested namespace.
    pub fn clone_with_section(&self, section: Arc<dyn SectionReader>) -> Self {
        Self {
            store: Arc::clone(&self.store),
            fs_id: self.fs_id.clone(),
            ztoc_id: self.ztoc_id.clone(),
            barrier: Arc::clone(&self.barrier),
            extractor: Arc::clone(&self.extractor),
            section,
        }
    }
}

impl<S: KvStore> Clone for MetadataReader<S> {
    /// Shares the same section reader as the original; use
    /// [`clone_with_section`](Self::clone_with_section) to point the clone
    /// at a different payload source.
    fn clone(&self) -> Self {
        self.clone_with_section(Arc::clone(&self.section))
    }
}
