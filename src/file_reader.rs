//! File reader: two composing random-access readers over one file's
//! uncompressed bytes. The layer reader is the primary one — it is what
//! `Reader::open_file` (store.rs) returns, backed by the span manager. The
//! extract reader is the inner path `MetadataReader::open_file` returns
//! directly: a caller holding only a file extractor and a section reader,
//! with no span manager/cache in front of it.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::error::Error;
use crate::metadata::extent::{ExtentDescriptor, ZtocRecord};
use crate::metrics::MetricsSink;
use crate::span::{ExtractConfig, FileExtractor, SectionReader, SpanManager};

/// Random-access byte interface over one file's decompressed contents.
///
/// `read_at(buf, off)` returns the number of bytes copied into `buf`,
/// `Ok(0)` at end-of-file (idiomatic with [`std::io::Read`]'s own EOF
/// convention), and `Err(Error::InvalidOffset)` for negative offsets.
pub trait ReaderAt: Send + Sync {
    fn read_at(&self, buf: &mut [u8], off: i64) -> Result<usize, Error>;

    /// Total uncompressed size of the file this reader was opened for.
    fn size(&self) -> u64;
}

fn copy_len(size: u64, off: i64, buf_len: usize) -> Result<usize, Error> {
    if off < 0 {
        return Err(Error::InvalidOffset { op: "read_at", offset: off });
    }
    let off = off as u64;
    if off >= size {
        return Ok(0);
    }
    Ok(std::cmp::min(buf_len as u64, size - off) as usize)
}

/// Extract reader: decompresses the whole file once (lazily, on first read)
/// via the external [`FileExtractor`], then serves every subsequent
/// `read_at` out of the cached bytes. `cached` is a [`OnceCell`] rather than
/// a `Mutex<Option<_>>` — there is exactly one value to ever compute, and
/// `get_or_try_init` makes "decompress on first read, reuse afterwards" a
/// single call instead of a lock-check-fill dance.
pub struct ExtractReader {
    section: Arc<dyn SectionReader>,
    extractor: Arc<dyn FileExtractor>,
    extent: ExtentDescriptor,
    ztoc: ZtocRecord,
    cached: OnceCell<Vec<u8>>,
}

impl ExtractReader {
    pub fn new(section: Arc<dyn SectionReader>, extractor: Arc<dyn FileExtractor>, extent: ExtentDescriptor, ztoc: ZtocRecord) -> Self {
        Self { section, extractor, extent, ztoc, cached: OnceCell::new() }
    }

    fn decompressed(&self) -> Result<&Vec<u8>, Error> {
        self.cached.get_or_try_init(|| {
            let config = ExtractConfig { extent: &self.extent, ztoc: &self.ztoc };
            self.extractor.extract_file(self.section.as_ref(), &config)
        })
    }
}

impl ReaderAt for ExtractReader {
    fn read_at(&self, buf: &mut [u8], off: i64) -> Result<usize, Error> {
        let size = self.extent.uncompressed_size;
        let n = copy_len(size, off, buf.len())?;
        if n == 0 {
            return Ok(0);
        }
        let bytes = self.decompressed()?;
        let start = off as usize;
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.extent.uncompressed_size
    }
}

/// Layer reader: given an inode id, resolved by the caller into an extent
/// descriptor, translates file-relative reads into absolute-layer reads
/// served by the span manager.
pub struct LayerReader<SM> {
    span_manager: Arc<SM>,
    extent: ExtentDescriptor,
    ino: u32,
    layer_digest: String,
    metrics: Arc<dyn MetricsSink>,
    /// Shared with every other `LayerReader` opened from the same parent
    /// `Reader`: the last-on-demand-read timestamp is a property of the
    /// reader as a whole, not of one open file.
    last_read: Arc<Mutex<Option<Instant>>>,
    /// Shared with the parent `Reader` and every sibling `LayerReader` so a
    /// single `close()` call reaches every already-open file; closed is
    /// idempotent, and every operation after it fails closed.
    closed: Arc<AtomicBool>,
}

impl<SM: SpanManager> LayerReader<SM> {
    pub fn new(
        span_manager: Arc<SM>,
        extent: ExtentDescriptor,
        ino: u32,
        layer_digest: String,
        metrics: Arc<dyn MetricsSink>,
        last_read: Arc<Mutex<Option<Instant>>>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self { span_manager, extent, ino, layer_digest, metrics, last_read, closed }
    }

    fn check_closed(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed { op: "read_at" });
        }
        Ok(())
    }
}

impl<SM: SpanManager> ReaderAt for LayerReader<SM> {
    fn read_at(&self, buf: &mut [u8], off: i64) -> Result<usize, Error> {
        self.check_closed()?;
        let size = self.extent.uncompressed_size;
        let n = copy_len(size, off, buf.len())?;
        if n == 0 {
            return Ok(0);
        }

        let abs_start = self.extent.uncompressed_offset + off as u64;
        let abs_end = abs_start + n as u64;
        let mut stream = self.span_manager.get_contents(abs_start, abs_end)?;

        let mut copied = 0usize;
        loop {
            let read = stream.read(&mut buf[copied..n]).map_err(Error::Io)?;
            if read == 0 {
                break;
            }
            copied += read;
            if copied == n {
                break;
            }
        }

        if copied != n {
            return Err(Error::ShortRead {
                ino: self.ino,
                message: format!(
                    "unexpected copied data size: expected {n} bytes at offset {off}, got {copied}"
                ),
            });
        }

        *self.last_read.lock() = Some(Instant::now());
        self.metrics.on_demand_fetch(&self.layer_digest, 1);
        self.metrics.on_demand_bytes_served(&self.layer_digest, copied as u64);

        Ok(copied)
    }

    fn size(&self) -> u64 {
        self.extent.uncompressed_size
    }
}

/// Test double for the external file extractor: returns a fixed buffer
/// regardless of the extract config, counting how many times it was asked
/// to decompress so tests can assert the extract reader caches the result.
#[cfg(test)]
struct FixedExtractor {
    bytes: Vec<u8>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl crate::span::FileExtractor for FixedExtractor {
    fn extract_file(&self, _section: &dyn SectionReader, _config: &ExtractConfig<'_>) -> Result<Vec<u8>, Error> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use crate::span::{MemSectionReader, MemSpanManager};

    fn extent(size: u64) -> ExtentDescriptor {
        ExtentDescriptor {
            uncompressed_offset: 100,
            uncompressed_size: size,
            span_start: 0,
            span_end: 0,
            first_span_has_bits: false,
            ztoc_id: "z".to_string(),
        }
    }

    fn ztoc_record() -> ZtocRecord {
        ZtocRecord { index_bytes: vec![], compressed_layer_size: 0, max_span_id: 0, version: 1 }
    }

    #[test]
    fn extract_reader_decompresses_once_and_serves_slices() {
        let extractor = Arc::new(FixedExtractor { bytes: b"hello world".to_vec(), calls: std::sync::atomic::AtomicUsize::new(0) });
        let section: Arc<dyn SectionReader> = Arc::new(MemSectionReader::new(vec![]));
        let reader = ExtractReader::new(section, Arc::clone(&extractor) as Arc<dyn FileExtractor>, extent(11), ztoc_record());

        let mut buf = [0u8; 5];
        assert_eq!(reader.read_at(&mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(reader.read_at(&mut buf, 6).unwrap(), 5);
        assert_eq!(&buf, b"world");
        assert_eq!(reader.read_at(&mut buf, 11).unwrap(), 0); // EOF

        assert_eq!(extractor.calls.load(Ordering::Relaxed), 1);
    }

    fn shared_state() -> (Arc<Mutex<Option<Instant>>>, Arc<AtomicBool>) {
        (Arc::new(Mutex::new(None)), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn reads_within_bounds_and_reports_eof() {
        let payload = vec![0u8; 100].into_iter().chain(b"hello".to_vec()).collect::<Vec<u8>>();
        let sm = Arc::new(MemSpanManager::new(payload));
        let (last_read, closed) = shared_state();
        let reader = LayerReader::new(sm, extent(5), 42, "digest".into(), Arc::new(NoopMetrics), Arc::clone(&last_read), closed);

        let mut buf = [0u8; 5];
        assert_eq!(reader.read_at(&mut buf, 0).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert!(last_read.lock().is_some());

        assert_eq!(reader.read_at(&mut buf, 5).unwrap(), 0); // EOF
    }

    #[test]
    fn negative_offset_is_invalid() {
        let sm = Arc::new(MemSpanManager::new(vec![0u8; 105]));
        let (last_read, closed) = shared_state();
        let reader = LayerReader::new(sm, extent(5), 1, "d".into(), Arc::new(NoopMetrics), last_read, closed);
        let mut buf = [0u8; 1];
        assert!(matches!(reader.read_at(&mut buf, -1), Err(Error::InvalidOffset { .. })));
    }

    #[test]
    fn short_read_from_span_manager_is_fatal_to_the_read() {
        let payload = vec![0u8; 100].into_iter().chain(b"hello".to_vec()).collect::<Vec<u8>>();
        let sm = Arc::new(MemSpanManager::truncating(payload, 4));
        let (last_read, closed) = shared_state();
        let reader = LayerReader::new(sm, extent(5), 7, "d".into(), Arc::new(NoopMetrics), last_read, closed);
        let mut buf = [0u8; 5];
        let err = reader.read_at(&mut buf, 0).unwrap_err();
        match err {
            Error::ShortRead { ino, message } => {
                assert_eq!(ino, 7);
                assert!(message.contains("unexpected copied data size"));
            }
            other => panic!("expected ShortRead, got {other:?}"),
        }
    }

    #[test]
    fn closed_reader_rejects_every_read() {
        let sm = Arc::new(MemSpanManager::new(vec![0u8; 105]));
        let (last_read, closed) = shared_state();
        let reader = LayerReader::new(sm, extent(5), 1, "d".into(), Arc::new(NoopMetrics), last_read, Arc::clone(&closed));
        closed.store(true, Ordering::Release);
        let mut buf = [0u8; 1];
        assert!(matches!(reader.read_at(&mut buf, 0), Err(Error::Closed { .. })));
    }

    #[test]
    fn close_reaches_every_sibling_reader_sharing_the_flag() {
        let sm = Arc::new(MemSpanManager::new(vec![0u8; 105]));
        let (last_read, closed) = shared_state();
        let a = LayerReader::new(Arc::clone(&sm), extent(5), 1, "d".into(), Arc::new(NoopMetrics), Arc::clone(&last_read), Arc::clone(&closed));
        let b = LayerReader::new(sm, extent(5), 2, "d".into(), Arc::new(NoopMetrics), last_read, Arc::clone(&closed));
        closed.store(true, Ordering::Release);
        let mut buf = [0u8; 1];
        assert!(matches!(a.read_at(&mut buf, 0), Err(Error::Closed { .. })));
        assert!(matches!(b.read_at(&mut buf, 0), Err(Error::Closed { .. })));
    }
}
