//! Embedded metadata store, lazy file reader, and verification gate for a
//! lazily-loaded, compressed container image layer.
//!
//! The ZTOC (the out-of-band index mapping paths and logical offsets to
//! compressed-byte spans) is ingested once into an embedded KV store
//! ([`kv`]); [`metadata`] serves random-access queries over the resulting
//! inode/directory/extent tree, including [`metadata::MetadataReader::open_file`],
//! a direct file-extractor-backed [`file_reader::ReaderAt`]; [`file_reader`]
//! additionally adapts the span manager's byte interface into the
//! cache-fronted, remote-capable [`file_reader::LayerReader`] that
//! [`store::Reader::open_file`] returns instead; [`gate`] gates the
//! transition from "warming" to "serving" on a caller-presented root digest.
//! [`store`] wires these into the two types callers actually hold:
//! [`store::Reader`] and [`store::VerifiableReader`].
//!
//! Span fetching, caching, decompression, remote transport, and digest
//! verification of individual chunks are consumed through traits
//! ([`span`], [`verify`]) rather than implemented here.

pub mod barrier;
pub mod config;
pub mod error;
pub mod file_reader;
pub mod gate;
pub mod kv;
pub mod metadata;
pub mod metrics;
pub mod span;
pub mod store;
pub mod verify;

pub use config::{IngestConfig, ReaderConfig};
pub use error::{CloseErrors, Error};
pub use file_reader::ReaderAt;
pub use gate::VerificationGate;
pub use metadata::{ingest, EntryType, MetadataReader, Ztoc, ZtocEntry, ZtocExtentInput};
pub use span::{ExtractConfig, FileExtractor, SectionReader, SpanManager};
pub use store::{new_metadata_reader, Reader, VerifiableReader};
pub use verify::{Verifier, VerifierFactory};
