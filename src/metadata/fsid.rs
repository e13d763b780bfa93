//! fsID generation: a short opaque string generated at ingest time. Ingest
//! retries ID generation up to a configurable limit in case of collision;
//! after that it fails.

use rand::RngCore;

use crate::config::IngestConfig;
use crate::error::Error;
use crate::kv::paths::BucketPath;
use crate::kv::store::KvStore;

fn random_fs_id(byte_len: usize) -> String {
    let mut buf = vec![0u8; byte_len];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Reserve a fresh, collision-free `/filesystems/<fsID>` namespace.
///
/// Generates a candidate id and attempts `create_bucket` directly (rather
/// than checking existence first then creating separately) so two
/// concurrent ingests can't both observe "not taken" and then both create
/// the same namespace; `create_bucket` is the atomic check.
pub fn reserve_fs_id(store: &impl KvStore, config: &IngestConfig) -> Result<String, Error> {
    for attempt in 0..config.fsid_retry_limit {
        let candidate = random_fs_id(config.fsid_byte_len);
        match store.batch(|t| t.create_bucket(&BucketPath::fs(&candidate))) {
            Ok(()) => return Ok(candidate),
            Err(e) => {
                tracing::debug!(attempt, fs_id = %candidate, error = %e, "fsID collision, retrying");
            }
        }
    }
    Err(Error::IngestFailed(format!(
        "fsID generation collided {} times in a row",
        config.fsid_retry_limit
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::mem_store::MemStore;

    #[test]
    fn allocates_distinct_ids_and_avoids_taken_namespace() {
        let store = MemStore::new();
        let config = IngestConfig::default();
        let first = reserve_fs_id(&store, &config).unwrap();
        let second = reserve_fs_id(&store, &config).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn exhausting_retry_budget_fails() {
        let store = MemStore::new();
        let config = IngestConfig { fsid_retry_limit: 0, ..IngestConfig::default() };
        assert!(reserve_fs_id(&store, &config).is_err());
    }
}
