//! The transactional nested-bucket KV store this crate's metadata layer is
//! built on: `view`, `batch`, `create_bucket`, `delete_bucket`, `get`,
//! `put`, `foreach`.
//!
//! Kept as a trait so [`sled_store`](super::sled_store) can provide the one
//! production implementation and [`mem_store`] an in-memory test double,
//! mirroring `ChainSafe-forest`'s `node/db` crate (`Store` trait +
//! `rocks`/`sled`/`memory` implementations).

use std::ops::ControlFlow;

use super::paths::BucketPath;
use crate::error::Error;

/// Read-only access to the store. `view` and `batch` transactions both
/// expose this surface; a `batch` transaction additionally allows mutation
/// through [`BatchTxn`].
pub trait ViewTxn {
    fn get(&self, bucket: &BucketPath, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    fn bucket_exists(&self, bucket: &BucketPath) -> Result<bool, Error>;

    /// Visit every `(key, value)` pair in `bucket` in ascending key order.
    /// Iteration halts when `f` returns `ControlFlow::Break(())`, but that is
    /// not itself an error.
    fn foreach(
        &self,
        bucket: &BucketPath,
        f: &mut dyn FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    ) -> Result<(), Error>;
}

/// Mutating access, available only inside [`KvStore::batch`].
pub trait BatchTxn: ViewTxn {
    /// Create a bucket. Fails with `Error::Other` describing a bucket-exists
    /// collision if the bucket is already present — ingestion's fsID retry
    /// loop depends on being able to distinguish this case.
    fn create_bucket(&mut self, bucket: &BucketPath) -> Result<(), Error>;

    fn delete_bucket(&mut self, bucket: &BucketPath) -> Result<(), Error>;

    fn put(&mut self, bucket: &BucketPath, key: &[u8], value: &[u8]) -> Result<(), Error>;
}

/// Error returned by `create_bucket` when the bucket already exists.
pub const BUCKET_EXISTS: &str = "bucket already exists";

/// The persistent KV store itself.
pub trait KvStore: Send + Sync {
    /// Run `f` against a read-only view transaction.
    fn view<T>(&self, f: impl FnOnce(&dyn ViewTxn) -> Result<T, Error>) -> Result<T, Error>;

    /// Run `f` against a batched write transaction. All nested-bucket writes
    /// performed inside `f` are applied together; see the sled
    /// implementation's module docs for the atomicity caveat this backend
    /// accepts.
    fn batch<T>(&self, f: impl FnOnce(&mut dyn BatchTxn) -> Result<T, Error>) -> Result<T, Error>;

    /// Delete an entire namespace (used when discarding a failed ingest).
    fn delete_namespace(&self, bucket: &BucketPath) -> Result<(), Error>;

    /// Count the *direct* sub-buckets of `bucket` — one path segment deeper,
    /// e.g. the `nodes/<ino>` buckets under `nodes_root(fs_id)` — without
    /// also counting buckets nested further still (`nodes/<ino>/xattrs/<k>`).
    /// Each inode's attributes live in their own sub-bucket rather than as
    /// entries of `nodes_root` itself (see `attr::write_attr`), so this is
    /// not the same thing as `ViewTxn::foreach` over `nodes_root`, which
    /// would see nothing there to iterate.
    fn count_subbuckets(&self, bucket: &BucketPath) -> Result<usize, Error>;
}
