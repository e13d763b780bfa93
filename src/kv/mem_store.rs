//! In-memory [`KvStore`] test double, the same role `ChainSafe-forest`'s
//! `node/db/src/memory.rs` `MemoryDB` plays there: a thread-safe `HashMap`
//! wrapper used in tests so they don't need a real on-disk backend.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::RwLock;

use super::paths::BucketPath;
use super::store::{BatchTxn, KvStore, ViewTxn, BUCKET_EXISTS};
use crate::error::Error;

type Bucket = HashMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Default, Clone)]
pub struct MemStore {
    buckets: Arc<RwLock<HashMap<Vec<u8>, Bucket>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemView<'a> {
    buckets: &'a HashMap<Vec<u8>, Bucket>,
}

impl ViewTxn for MemView<'_> {
    fn get(&self, bucket: &BucketPath, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.buckets.get(&bucket.tree_name()).and_then(|b| b.get(key)).cloned())
    }

    fn bucket_exists(&self, bucket: &BucketPath) -> Result<bool, Error> {
        Ok(self.buckets.contains_key(&bucket.tree_name()))
    }

    fn foreach(
        &self,
        bucket: &BucketPath,
        f: &mut dyn FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    ) -> Result<(), Error> {
        let Some(b) = self.buckets.get(&bucket.tree_name()) else {
            return Ok(());
        };
        let mut keys: Vec<&Vec<u8>> = b.keys().collect();
        keys.sort();
        for k in keys {
            if f(k, &b[k]).is_break() {
                break;
            }
        }
        Ok(())
    }
}

struct MemBatch<'a> {
    buckets: &'a mut HashMap<Vec<u8>, Bucket>,
}

impl ViewTxn for MemBatch<'_> {
    fn get(&self, bucket: &BucketPath, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.buckets.get(&bucket.tree_name()).and_then(|b| b.get(key)).cloned())
    }

    fn bucket_exists(&self, bucket: &BucketPath) -> Result<bool, Error> {
        Ok(self.buckets.contains_key(&bucket.tree_name()))
    }

    fn foreach(
        &self,
        bucket: &BucketPath,
        f: &mut dyn FnMut(&[u8], &[u8]) -> ControlFlow<()>,
    ) -> Result<(), Error> {
        let Some(b) = self.buckets.get(&bucket.tree_name()) else {
            return Ok(());
        };
        let mut keys: Vec<&Vec<u8>> = b.keys().collect();
        keys.sort();
        for k in keys {
            if f(k, &b[k]).is_break() {
                break;
            }
        }
        Ok(())
    }
}

impl BatchTxn for MemBatch<'_> {
    fn create_bucket(&mut self, bucket: &BucketPath) -> Result<(), Error> {
        let name = bucket.tree_name();
        if self.buckets.contains_key(&name) {
            return Err(Error::Other(format!("{BUCKET_EXISTS}: {bucket:?}")));
        }
        self.buckets.insert(name, HashMap::new());
        Ok(())
    }

    fn delete_bucket(&mut self, bucket: &BucketPath) -> Result<(), Error> {
        self.buckets.remove(&bucket.tree_name());
        Ok(())
    }

    fn put(&mut self, bucket: &BucketPath, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.buckets
            .entry(bucket.tree_name())
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

impl KvStore for MemStore {
    fn view<T>(&self, f: impl FnOnce(&dyn ViewTxn) -> Result<T, Error>) -> Result<T, Error> {
        let guard = self.buckets.read();
        let txn = MemView { buckets: &guard };
        f(&txn)
    }

    fn batch<T>(&self, f: impl FnOnce(&mut dyn BatchTxn) -> Result<T, Error>) -> Result<T, Error> {
        let mut guard = self.buckets.write();
        let mut txn = MemBatch { buckets: &mut guard };
        f(&mut txn)
    }

    fn delete_namespace(&self, bucket: &BucketPath) -> Result<(), Error> {
        let prefix = bucket.tree_name();
        let mut guard = self.buckets.write();
        guard.retain(|name, _| !name.starts_with(prefix.as_slice()));
        Ok(())
    }

    fn count_subbuckets(&self, bucket: &BucketPath) -> Result<usize, Error> {
        let prefix = bucket.tree_name();
        let want_depth = bucket.depth() + 1;
        let guard = self.buckets.read();
        Ok(guard
            .keys()
            .filter(|n| n.starts_with(prefix.as_slice()) && n.as_slice() != prefix.as_slice())
            .filter(|n| BucketPath::decode_tree_name(n).len() == want_depth)
            .count())
    }
}
