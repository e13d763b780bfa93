//! Extent descriptors, ZTOC records, and directory child indices — all
//! live under `metadata/<inodeID>/`.

use std::ops::ControlFlow;

use crate::error::Error;
use crate::kv::codec::{decode_u32, decode_u64, encode_u32, encode_u64};
use crate::kv::paths::BucketPath;
use crate::kv::store::{BatchTxn, ViewTxn};

/// A stored ZTOC record: index bytes, compressed layer size, max span id,
/// version.
#[derive(Debug, Clone, PartialEq)]
pub struct ZtocRecord {
    pub index_bytes: Vec<u8>,
    pub compressed_layer_size: u64,
    pub max_span_id: u32,
    pub version: u32,
}

const K_INDEX_BYTES: &[u8] = b"indexBytes";
const K_COMPRESSED_SIZE: &[u8] = b"compressedLayerSize";
const K_MAX_SPAN_ID: &[u8] = b"maxSpanId";
const K_VERSION: &[u8] = b"version";

pub fn write_ztoc_record(
    txn: &mut dyn BatchTxn,
    fs_id: &str,
    ztoc_id: &str,
    rec: &ZtocRecord,
) -> Result<(), Error> {
    let bucket = BucketPath::ztoc(fs_id, ztoc_id);
    txn.create_bucket(&bucket)?;
    txn.put(&bucket, K_INDEX_BYTES, &rec.index_bytes)?;
    txn.put(&bucket, K_COMPRESSED_SIZE, &encode_u64(rec.compressed_layer_size))?;
    txn.put(&bucket, K_MAX_SPAN_ID, &encode_u32(rec.max_span_id) as &[u8])?;
    txn.put(&bucket, K_VERSION, &encode_u32(rec.version) as &[u8])?;
    Ok(())
}

pub fn read_ztoc_record(view: &dyn ViewTxn, fs_id: &str, ztoc_id: &str) -> Result<ZtocRecord, Error> {
    let bucket = BucketPath::ztoc(fs_id, ztoc_id);
    // A missing bucket must surface as not-found, never be swallowed into a
    // silent `None` (see DESIGN.md).
    if !view.bucket_exists(&bucket)? {
        return Err(Error::not_found("get_ztoc", ztoc_id.to_string()));
    }
    let index_bytes = view.get(&bucket, K_INDEX_BYTES)?.unwrap_or_default();
    let compressed_layer_size = view
        .get(&bucket, K_COMPRESSED_SIZE)?
        .and_then(|b| decode_u64(&b))
        .unwrap_or(0);
    let max_span_id = view.get(&bucket, K_MAX_SPAN_ID)?.and_then(|b| decode_u32(&b)).unwrap_or(0);
    let version = view.get(&bucket, K_VERSION)?.and_then(|b| decode_u32(&b)).unwrap_or(0);
    Ok(ZtocRecord { index_bytes, compressed_layer_size, max_span_id, version })
}

/// A file's extent descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtentDescriptor {
    pub uncompressed_offset: u64,
    pub uncompressed_size: u64,
    pub span_start: u32,
    pub span_end: u32,
    pub first_span_has_bits: bool,
    pub ztoc_id: String,
}

const K_UNCOMPRESSED_OFFSET: &[u8] = b"uncompressedOffset";
const K_UNCOMPRESSED_SIZE: &[u8] = b"uncompressedSize";
const K_SPAN_START: &[u8] = b"spanStart";
const K_SPAN_END: &[u8] = b"spanEnd";
const K_FIRST_SPAN_BITS: &[u8] = b"firstSpanHasBits";
const K_ZTOC_ID: &[u8] = b"ztocID";
const K_CHILD_NAME: &[u8] = b"childName";
const K_CHILD_ID: &[u8] = b"childID";

pub fn write_extent(
    txn: &mut dyn BatchTxn,
    fs_id: &str,
    ino: u32,
    extent: &ExtentDescriptor,
) -> Result<(), Error> {
    let bucket = BucketPath::metadata(fs_id, ino);
    txn.create_bucket(&bucket).or_else(|_| Ok::<_, Error>(()))?;
    txn.put(&bucket, K_UNCOMPRESSED_OFFSET, &encode_u64(extent.uncompressed_offset))?;
    txn.put(&bucket, K_UNCOMPRESSED_SIZE, &encode_u64(extent.uncompressed_size))?;
    txn.put(&bucket, K_SPAN_START, &encode_u32(extent.span_start) as &[u8])?;
    txn.put(&bucket, K_SPAN_END, &encode_u32(extent.span_end) as &[u8])?;
    txn.put(&bucket, K_FIRST_SPAN_BITS, &[extent.first_span_has_bits as u8])?;
    txn.put(&bucket, K_ZTOC_ID, extent.ztoc_id.as_bytes())?;
    Ok(())
}

pub fn read_extent(view: &dyn ViewTxn, fs_id: &str, ino: u32) -> Result<Option<ExtentDescriptor>, Error> {
    let bucket = BucketPath::metadata(fs_id, ino);
    if !view.bucket_exists(&bucket)? {
        return Ok(None);
    }
    let Some(ztoc_id_bytes) = view.get(&bucket, K_ZTOC_ID)? else {
        return Ok(None);
    };
    let uncompressed_offset = view
        .get(&bucket, K_UNCOMPRESSED_OFFSET)?
        .and_then(|b| decode_u64(&b))
        .unwrap_or(0);
    let uncompressed_size = view
        .get(&bucket, K_UNCOMPRESSED_SIZE)?
        .and_then(|b| decode_u64(&b))
        .unwrap_or(0);
    let span_start = view.get(&bucket, K_SPAN_START)?.and_then(|b| decode_u32(&b)).unwrap_or(0);
    let span_end = view.get(&bucket, K_SPAN_END)?.and_then(|b| decode_u32(&b)).unwrap_or(0);
    let first_span_has_bits = view
        .get(&bucket, K_FIRST_SPAN_BITS)?
        .map(|b| b.first().copied().unwrap_or(0) != 0)
        .unwrap_or(false);
    Ok(Some(ExtentDescriptor {
        uncompressed_offset,
        uncompressed_size,
        span_start,
        span_end,
        first_span_has_bits,
        ztoc_id: String::from_utf8_lossy(&ztoc_id_bytes).into_owned(),
    }))
}

/// Attach `child_ino` under `base` in `parent_ino`'s child index, using a
/// "first child inline + overflow bucket" optimization: the
/// first child a directory gains is stored directly in `childName`/`childID`;
/// every subsequent child goes in the `childrenExtra/<name>` overflow bucket.
pub fn attach_child(
    txn: &mut dyn BatchTxn,
    fs_id: &str,
    parent_ino: u32,
    base: &str,
    child_ino: u32,
) -> Result<(), Error> {
    let bucket = BucketPath::metadata(fs_id, parent_ino);
    txn.create_bucket(&bucket).or_else(|_| Ok::<_, Error>(()))?;
    if txn.get(&bucket, K_CHILD_NAME)?.is_none() {
        txn.put(&bucket, K_CHILD_NAME, base.as_bytes())?;
        txn.put(&bucket, K_CHILD_ID, &encode_u32(child_ino) as &[u8])?;
        return Ok(());
    }
    let extra = BucketPath::children_extra(fs_id, parent_ino);
    txn.create_bucket(&extra).or_else(|_| Ok::<_, Error>(()))?;
    txn.put(&extra, base.as_bytes(), &encode_u32(child_ino) as &[u8])?;
    Ok(())
}

/// Look up one child by name.
pub fn lookup_child(view: &dyn ViewTxn, fs_id: &str, parent_ino: u32, base: &str) -> Result<Option<u32>, Error> {
    let bucket = BucketPath::metadata(fs_id, parent_ino);
    if let Some(name) = view.get(&bucket, K_CHILD_NAME)? {
        if name == base.as_bytes() {
            let id = view
                .get(&bucket, K_CHILD_ID)?
                .and_then(|b| decode_u32(&b))
                .ok_or_else(|| Error::not_found("get_child", base.to_string()))?;
            return Ok(Some(id));
        }
    }
    let extra = BucketPath::children_extra(fs_id, parent_ino);
    if view.bucket_exists(&extra)? {
        if let Some(id) = view.get(&extra, base.as_bytes())?.and_then(|b| decode_u32(&b)) {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Visit every `(name, child_id)` pair of `parent_ino`: the inline first
/// child, then each overflow entry. Iteration order is unspecified but
/// stable within one call.
pub fn foreach_child(
    view: &dyn ViewTxn,
    fs_id: &str,
    parent_ino: u32,
    f: &mut dyn FnMut(&str, u32) -> ControlFlow<()>,
) -> Result<(), Error> {
    let bucket = BucketPath::metadata(fs_id, parent_ino);
    if let (Some(name), Some(id)) = (view.get(&bucket, K_CHILD_NAME)?, view.get(&bucket, K_CHILD_ID)?) {
        if let Some(id) = decode_u32(&id) {
            let name = String::from_utf8_lossy(&name).into_owned();
            if f(&name, id).is_break() {
                return Ok(());
            }
        }
    }
    let extra = BucketPath::children_extra(fs_id, parent_ino);
    if !view.bucket_exists(&extra)? {
        return Ok(());
    }
    view.foreach(&extra, &mut |k, v| {
        let Some(id) = decode_u32(v) else { return ControlFlow::Continue(()) };
        let name = String::from_utf8_lossy(k).into_owned();
        f(&name, id)
    })
}
