//! Attribute record and its `nodes/<inodeID>/` encoding. Mode bit layout
//! follows the `S_IFMT` convention used elsewhere in this crate to classify
//! on-disk dinodes.

use std::collections::HashMap;

use crate::error::Error;
use crate::kv::codec::{decode_i64, decode_u64, encode_i64, encode_u64};
use crate::kv::paths::BucketPath;
use crate::kv::store::{BatchTxn, ViewTxn};
use crate::metadata::ztoc::EntryType;

/// S_IFMT mask.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFIFO: u32 = 0o010000;
pub const S_IFSOCK: u32 = 0o140000;

pub fn type_bits(entry_type: EntryType) -> u32 {
    match entry_type {
        EntryType::Regular => S_IFREG,
        EntryType::Directory => S_IFDIR,
        EntryType::Symlink => S_IFLNK,
        EntryType::Hardlink => 0, // resolved to the target's existing type bits
        EntryType::CharDevice => S_IFCHR,
        EntryType::BlockDevice => S_IFBLK,
        EntryType::Fifo => S_IFIFO,
        EntryType::Socket => S_IFSOCK,
    }
}

/// One inode's attribute record.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRecord {
    pub size: i64,
    pub mode: u32,
    pub num_link: u32,
    pub mod_time_unix: i64,
    pub uid: u32,
    pub gid: u32,
    pub dev_major: u32,
    pub dev_minor: u32,
    pub link_name: Option<String>,
    pub xattrs: HashMap<String, Vec<u8>>,
}

impl AttributeRecord {
    pub fn is_dir(&self) -> bool {
        (self.mode & S_IFMT) == S_IFDIR
    }

    pub fn is_regular(&self) -> bool {
        (self.mode & S_IFMT) == S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        (self.mode & S_IFMT) == S_IFLNK
    }

    pub fn root() -> Self {
        AttributeRecord {
            size: 0,
            mode: S_IFDIR | 0o755,
            num_link: 2,
            mod_time_unix: 0,
            uid: 0,
            gid: 0,
            dev_major: 0,
            dev_minor: 0,
            link_name: None,
            xattrs: HashMap::new(),
        }
    }
}

const K_SIZE: &[u8] = b"size";
const K_MODE: &[u8] = b"mode";
const K_NUM_LINK: &[u8] = b"numLink";
const K_MOD_TIME: &[u8] = b"modTime";
const K_UID: &[u8] = b"uid";
const K_GID: &[u8] = b"gid";
const K_DEV_MAJOR: &[u8] = b"devMajor";
const K_DEV_MINOR: &[u8] = b"devMinor";
const K_LINK_NAME: &[u8] = b"linkName";

pub fn write_attr(
    txn: &mut dyn BatchTxn,
    fs_id: &str,
    ino: u32,
    attr: &AttributeRecord,
) -> Result<(), Error> {
    let bucket = BucketPath::node(fs_id, ino);
    txn.create_bucket(&bucket).or_else(|_| Ok::<_, Error>(()))?;
    txn.put(&bucket, K_SIZE, &encode_i64(attr.size))?;
    txn.put(&bucket, K_MODE, &encode_u64(attr.mode as u64))?;
    txn.put(&bucket, K_NUM_LINK, &encode_u64(attr.num_link as u64))?;
    txn.put(&bucket, K_MOD_TIME, &encode_i64(attr.mod_time_unix))?;
    txn.put(&bucket, K_UID, &encode_u64(attr.uid as u64))?;
    txn.put(&bucket, K_GID, &encode_u64(attr.gid as u64))?;
    txn.put(&bucket, K_DEV_MAJOR, &encode_u64(attr.dev_major as u64))?;
    txn.put(&bucket, K_DEV_MINOR, &encode_u64(attr.dev_minor as u64))?;
    if let Some(link) = &attr.link_name {
        txn.put(&bucket, K_LINK_NAME, link.as_bytes())?;
    }
    if !attr.xattrs.is_empty() {
        let xattr_bucket = BucketPath::xattrs(fs_id, ino);
        txn.create_bucket(&xattr_bucket).or_else(|_| Ok::<_, Error>(()))?;
        for (k, v) in &attr.xattrs {
            txn.put(&xattr_bucket, k.as_bytes(), v)?;
        }
    }
    Ok(())
}

/// Update just `numLink` for an existing node (hardlink and
/// forward-directory-reference handling).
pub fn bump_num_link(txn: &mut dyn BatchTxn, fs_id: &str, ino: u32, delta: i64) -> Result<u32, Error> {
    let bucket = BucketPath::node(fs_id, ino);
    let current = txn
        .get(&bucket, K_NUM_LINK)?
        .and_then(|b| decode_u64(&b))
        .ok_or_else(|| Error::not_found("bump_num_link", format!("ino {ino}")))?;
    let next = (current as i64 + delta).max(0) as u64;
    txn.put(&bucket, K_NUM_LINK, &encode_u64(next))?;
    Ok(next as u32)
}

pub fn read_attr(view: &dyn ViewTxn, fs_id: &str, ino: u32) -> Result<AttributeRecord, Error> {
    let bucket = BucketPath::node(fs_id, ino);
    if !view.bucket_exists(&bucket)? {
        return Err(Error::not_found("get_attr", format!("ino {ino}")));
    }
    let get_i64 = |k: &[u8]| -> Result<i64, Error> {
        Ok(view.get(&bucket, k)?.and_then(|b| decode_i64(&b)).unwrap_or(0))
    };
    let get_u64 = |k: &[u8]| -> Result<u64, Error> {
        Ok(view.get(&bucket, k)?.and_then(|b| decode_u64(&b)).unwrap_or(0))
    };
    let link_name = view
        .get(&bucket, K_LINK_NAME)?
        .map(|b| String::from_utf8_lossy(&b).into_owned());

    let mut xattrs = HashMap::new();
    let xattr_bucket = BucketPath::xattrs(fs_id, ino);
    if view.bucket_exists(&xattr_bucket)? {
        view.foreach(&xattr_bucket, &mut |k, v| {
            xattrs.insert(String::from_utf8_lossy(k).into_owned(), v.to_vec());
            std::ops::ControlFlow::Continue(())
        })?;
    }

    Ok(AttributeRecord {
        size: get_i64(K_SIZE)?,
        mode: get_u64(K_MODE)? as u32,
        num_link: get_u64(K_NUM_LINK)? as u32,
        mod_time_unix: get_i64(K_MOD_TIME)?,
        uid: get_u64(K_UID)? as u32,
        gid: get_u64(K_GID)? as u32,
        dev_major: get_u64(K_DEV_MAJOR)? as u32,
        dev_minor: get_u64(K_DEV_MINOR)? as u32,
        link_name,
        xattrs,
    })
}
