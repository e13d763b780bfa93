//! Bucket-path conventions for the nested KV namespace.
//!
//! ```text
//! /filesystems/<fsID>/
//!     ztocs/<ztocID>/
//!     metadata/<inodeID>/
//!     nodes/<inodeID>/
//! ```

use super::codec::encode_ino_key;

/// Top-level bucket all filesystem namespaces live under.
pub const ROOT_BUCKET: &str = "filesystems";

/// A path to a nested bucket, e.g. `["filesystems", "<fsid>", "nodes", "<ino>"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketPath(pub Vec<Vec<u8>>);

impl BucketPath {
    pub fn root() -> Self {
        BucketPath(vec![ROOT_BUCKET.as_bytes().to_vec()])
    }

    pub fn fs(fs_id: &str) -> Self {
        BucketPath(vec![ROOT_BUCKET.as_bytes().to_vec(), fs_id.as_bytes().to_vec()])
    }

    pub fn ztocs(fs_id: &str) -> Self {
        Self::fs(fs_id).child("ztocs")
    }

    pub fn ztoc(fs_id: &str, ztoc_id: &str) -> Self {
        Self::ztocs(fs_id).child(ztoc_id)
    }

    pub fn metadata_root(fs_id: &str) -> Self {
        Self::fs(fs_id).child("metadata")
    }

    pub fn metadata(fs_id: &str, ino: u32) -> Self {
        Self::metadata_root(fs_id).child_ino(ino)
    }

    pub fn children_extra(fs_id: &str, ino: u32) -> Self {
        Self::metadata(fs_id, ino).child("childrenExtra")
    }

    pub fn nodes_root(fs_id: &str) -> Self {
        Self::fs(fs_id).child("nodes")
    }

    pub fn node(fs_id: &str, ino: u32) -> Self {
        Self::nodes_root(fs_id).child_ino(ino)
    }

    pub fn xattrs(fs_id: &str, ino: u32) -> Self {
        Self::node(fs_id, ino).child("xattrs")
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut v = self.0.clone();
        v.push(segment.as_bytes().to_vec());
        BucketPath(v)
    }

    pub fn child_ino(&self, ino: u32) -> Self {
        let mut v = self.0.clone();
        v.push(encode_ino_key(ino).to_vec());
        BucketPath(v)
    }

    /// Flatten into a single sled tree name. Sled trees are flat namespaces;
    /// nesting is represented as a joined key with a separator that cannot
    /// appear inside a path segment (fsIDs are hex, names are utf-8 but
    /// segments here are always our own fixed literals, ids, or
    /// caller-supplied names escaped by length-prefixing).
    pub fn tree_name(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(0x1f); // unit separator, never valid in our segments
            }
            out.extend_from_slice(&(seg.len() as u32).to_be_bytes());
            out.extend_from_slice(seg);
        }
        out
    }

    /// Number of path segments. Used alongside [`Self::decode_tree_name`] to
    /// tell a *direct* sub-bucket of this path from a deeper descendant when
    /// prefix-scanning a backend's flat tree-name space.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Inverse of [`Self::tree_name`]: split a flattened tree name back into
    /// its path segments. Used to count direct sub-buckets of a prefix
    /// (e.g. the `nodes/<ino>` buckets under `nodes_root`) without also
    /// counting buckets nested one level deeper still (e.g. `nodes/<ino>/xattrs/<k>`).
    pub fn decode_tree_name(mut bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut segments = Vec::new();
        let mut first = true;
        while !bytes.is_empty() {
            if !first {
                bytes = &bytes[1..];
            }
            first = false;
            let len = u32::from_be_bytes(bytes[..4].try_into().expect("length prefix")) as usize;
            bytes = &bytes[4..];
            segments.push(bytes[..len].to_vec());
            bytes = &bytes[len..];
        }
        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_paths_yield_distinct_tree_names() {
        let a = BucketPath::node("fs1", 5);
        let b = BucketPath::node("fs1", 6);
        let c = BucketPath::metadata("fs1", 5);
        assert_ne!(a.tree_name(), b.tree_name());
        assert_ne!(a.tree_name(), c.tree_name());
    }

    #[test]
    fn same_logical_path_yields_same_tree_name() {
        let a = BucketPath::node("fs1", 42);
        let b = BucketPath::nodes_root("fs1").child_ino(42);
        assert_eq!(a.tree_name(), b.tree_name());
    }

    #[test]
    fn decode_tree_name_round_trips() {
        let path = BucketPath::xattrs("fs1", 42);
        assert_eq!(BucketPath::decode_tree_name(&path.tree_name()), path.0);
    }

    #[test]
    fn depth_counts_segments() {
        assert_eq!(BucketPath::nodes_root("fs1").depth(), 3);
        assert_eq!(BucketPath::node("fs1", 1).depth(), 4);
    }
}
