//! The metadata store (spec §4.1, §4.2, §4.3): ZTOC ingestion into the KV
//! store and the read-side query surface over the result.

pub mod attr;
pub mod extent;
pub mod fsid;
pub mod ingest;
pub mod reader;
pub mod ztoc;

pub use ingest::{ingest, ingest_phase1, ingest_tree, normalize_path, ROOT_ID};
pub use reader::MetadataReader;
pub use ztoc::{EntryType, Ztoc, ZtocEntry, ZtocExtentInput};
