//! Span manager and section-reader collaborators (spec §1 "Out of scope /
//! external collaborators", §6 "Consumed interfaces").
//!
//! Neither of these is implemented by this crate: the span manager owns
//! remote fetch, caching, eviction, and decompression policy; the section
//! reader is whatever lets the file extractor see a byte range of the
//! compressed layer. Both are capability-set traits (spec §9) with test
//! doubles living alongside the code that consumes them.

use std::io::Read;

use crate::error::Error;
use crate::metadata::extent::{ExtentDescriptor, ZtocRecord};

/// Given an absolute uncompressed byte interval `[start, end)` over the
/// layer, returns a lazy byte stream (spec §1, §4.4 `layer reader`).
///
/// The returned stream is drained to EOF synchronously by the caller (spec
/// §9 "Coroutine / async": "implementations may back it with an async
/// producer but must present a blocking drain") — a boxed [`Read`] is the
/// idiomatic Rust shape for that contract.
pub trait SpanManager: Send + Sync {
    fn get_contents(&self, start: u64, end: u64) -> Result<Box<dyn Read + Send>, Error>;
}

/// A byte-range view over the compressed layer (spec §4.4 `extract reader`:
/// "a compressed-layer section reader").
pub trait SectionReader: Send + Sync {
    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, Error>;
}

/// Arguments the external [`FileExtractor`] needs to decompress one file's
/// bytes out of a section of the compressed layer (spec §1 "ZTOC parser and
/// file extractor", §4.4 "extract reader").
pub struct ExtractConfig<'a> {
    pub extent: &'a ExtentDescriptor,
    pub ztoc: &'a ZtocRecord,
}

/// `extract-file(sectionReader, extractConfig) → decompressedBytes` (spec
/// §6 "Consumed interfaces"). Given an extract descriptor and a section of
/// the compressed layer, returns the whole file's decompressed bytes; owns
/// span decompression and the "first-span-has-bits" leading-bit carry-over,
/// neither of which this crate implements.
pub trait FileExtractor: Send + Sync {
    fn extract_file(&self, section: &dyn SectionReader, config: &ExtractConfig<'_>) -> Result<Vec<u8>, Error>;
}

/// A [`FileExtractor`] test double that treats the section reader's bytes as
/// already decompressed, reading the extent's uncompressed range straight
/// out of it. Real extractors own span decompression; this one is only fit
/// for fixtures that put plain bytes at `extent.uncompressed_offset`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFileExtractor;

impl FileExtractor for IdentityFileExtractor {
    fn extract_file(&self, section: &dyn SectionReader, config: &ExtractConfig<'_>) -> Result<Vec<u8>, Error> {
        let start = config.extent.uncompressed_offset;
        let end = start + config.extent.uncompressed_size;
        section.read_range(start, end)
    }
}

/// An in-memory [`SectionReader`], the test double used in place of a real
/// remote-layer or on-disk section reader.
#[derive(Debug, Clone)]
pub struct MemSectionReader {
    bytes: std::sync::Arc<Vec<u8>>,
}

impl MemSectionReader {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes: std::sync::Arc::new(bytes) }
    }
}

impl SectionReader for MemSectionReader {
    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>, Error> {
        let start = start as usize;
        let end = end as usize;
        if start > end || end > self.bytes.len() {
            return Err(Error::InvalidOffset { op: "read_range", offset: start as i64 });
        }
        Ok(self.bytes[start..end].to_vec())
    }
}

/// An in-memory [`SpanManager`] test double that serves a fixed uncompressed
/// byte buffer, optionally truncating responses to simulate a short read
/// (spec §8 scenario 6).
#[derive(Debug, Clone)]
pub struct MemSpanManager {
    bytes: std::sync::Arc<Vec<u8>>,
    truncate_to: Option<usize>,
}

impl MemSpanManager {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes: std::sync::Arc::new(bytes), truncate_to: None }
    }

    /// Serve every response with at most `n` bytes, regardless of the
    /// requested range, to simulate the span manager short-changing the
    /// reader.
    pub fn truncating(bytes: Vec<u8>, n: usize) -> Self {
        Self { bytes: std::sync::Arc::new(bytes), truncate_to: Some(n) }
    }
}

impl SpanManager for MemSpanManager {
    fn get_contents(&self, start: u64, end: u64) -> Result<Box<dyn Read + Send>, Error> {
        let start = start as usize;
        let end = end as usize;
        if start > end || end > self.bytes.len() {
            return Err(Error::InvalidOffset { op: "get_contents", offset: start as i64 });
        }
        let mut slice = self.bytes[start..end].to_vec();
        if let Some(n) = self.truncate_to {
            slice.truncate(n);
        }
        Ok(Box::new(std::io::Cursor::new(slice)))
    }
}
