//! Types describing the ZTOC: the out-of-band index ingestion consumes,
//! mapping paths and logical offsets to compressed-byte spans. The actual
//! ZTOC *parser* is an external collaborator, given an extract descriptor
//! and a section of the compressed layer it returns the decompressed file
//! bytes; this module only defines the shape ingestion reads.

use std::collections::HashMap;

/// File type recorded in a ZTOC entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    Directory,
    Symlink,
    Hardlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

/// One entry from the ZTOC's file list.
#[derive(Debug, Clone)]
pub struct ZtocEntry {
    pub entry_type: EntryType,
    /// Path as given by the ZTOC; normalized by ingestion before lookup.
    pub name: String,
    /// Target for hardlink/symlink entries.
    pub linkname: Option<String>,
    pub size: i64,
    /// Permission bits only (type bits are implied by `entry_type`).
    pub perm: u32,
    pub uid: u32,
    pub gid: u32,
    pub mod_time_unix: i64,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub xattrs: HashMap<String, Vec<u8>>,
    /// Payload location, present for regular-file entries with non-hardlink
    /// payload bytes.
    pub extent: Option<ZtocExtentInput>,
}

/// The raw extent fields as given by the ZTOC for one entry, prior to being
/// paired with a stored `ZtocRecord` reference.
#[derive(Debug, Clone, Copy)]
pub struct ZtocExtentInput {
    pub uncompressed_offset: u64,
    pub uncompressed_size: u64,
    pub span_start: u32,
    pub span_end: u32,
    pub first_span_has_bits: bool,
}

/// The ZTOC as a whole: an ordered entry list plus the span index bytes and
/// sizing metadata referenced by every extent descriptor derived from it.
#[derive(Debug, Clone)]
pub struct Ztoc {
    pub entries: Vec<ZtocEntry>,
    pub index_bytes: Vec<u8>,
    pub compressed_layer_size: u64,
    pub max_span_id: u32,
    pub version: u32,
}

impl ZtocEntry {
    pub fn regular(name: impl Into<String>, size: i64, extent: ZtocExtentInput) -> Self {
        Self {
            entry_type: EntryType::Regular,
            name: name.into(),
            linkname: None,
            size,
            perm: 0o644,
            uid: 0,
            gid: 0,
            mod_time_unix: 0,
            dev_major: 0,
            dev_minor: 0,
            xattrs: HashMap::new(),
            extent: Some(extent),
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Directory,
            name: name.into(),
            linkname: None,
            size: 0,
            perm: 0o755,
            uid: 0,
            gid: 0,
            mod_time_unix: 0,
            dev_major: 0,
            dev_minor: 0,
            xattrs: HashMap::new(),
            extent: None,
        }
    }

    pub fn hardlink(name: impl Into<String>, linkname: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Hardlink,
            name: name.into(),
            linkname: Some(linkname.into()),
            size: 0,
            perm: 0,
            uid: 0,
            gid: 0,
            mod_time_unix: 0,
            dev_major: 0,
            dev_minor: 0,
            xattrs: HashMap::new(),
            extent: None,
        }
    }

    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Symlink,
            name: name.into(),
            linkname: Some(target.into()),
            size: 0,
            perm: 0o777,
            uid: 0,
            gid: 0,
            mod_time_unix: 0,
            dev_major: 0,
            dev_minor: 0,
            xattrs: HashMap::new(),
            extent: None,
        }
    }
}
