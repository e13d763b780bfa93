//! Digest verifier factory (spec §1, §6: "given a chunk id and an expected
//! digest string, produces a verifier that can attest the bytes of that
//! chunk") and the verification-failure latch the gate (`gate.rs`) consumes.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Attests the bytes of one chunk against an expected digest.
pub trait Verifier: Send + Sync {
    fn verify(&self, data: &[u8]) -> Result<(), Error>;
}

/// `(chunkID, digestString) → Verifier` (spec §6). "Digest parse errors
/// surface as *invalid-chunk-digest*" (spec §7).
pub trait VerifierFactory: Send + Sync {
    fn verifier(&self, chunk_id: &str, expected_digest: &str) -> Result<Box<dyn Verifier>, Error>;
}

/// Production factory: digests are `sha256:<hex>` strings, matching the
/// content-addressed chunk digests container image layers use.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256VerifierFactory;

struct Sha256Verifier {
    chunk_id: String,
    expected: [u8; 32],
}

fn parse_sha256_digest(digest: &str) -> Result<[u8; 32], Error> {
    let hex_part = digest.strip_prefix("sha256:").ok_or_else(|| Error::InvalidChunkDigest {
        digest: digest.to_string(),
        reason: "missing sha256: prefix".to_string(),
    })?;
    let bytes = hex::decode(hex_part).map_err(|e| Error::InvalidChunkDigest {
        digest: digest.to_string(),
        reason: e.to_string(),
    })?;
    bytes.try_into().map_err(|v: Vec<u8>| Error::InvalidChunkDigest {
        digest: digest.to_string(),
        reason: format!("expected 32 bytes, got {}", v.len()),
    })
}

impl VerifierFactory for Sha256VerifierFactory {
    fn verifier(&self, chunk_id: &str, expected_digest: &str) -> Result<Box<dyn Verifier>, Error> {
        let expected = parse_sha256_digest(expected_digest)?;
        Ok(Box::new(Sha256Verifier { chunk_id: chunk_id.to_string(), expected }))
    }
}

impl Verifier for Sha256Verifier {
    fn verify(&self, data: &[u8]) -> Result<(), Error> {
        let actual: [u8; 32] = Sha256::digest(data).into();
        if actual == self.expected {
            Ok(())
        } else {
            Err(Error::VerificationFailed(format!(
                "chunk {} digest mismatch: expected {}, got {}",
                self.chunk_id,
                hex::encode(self.expected),
                hex::encode(actual)
            )))
        }
    }
}

/// Latches the first warming-phase chunk-verification failure and counts
/// every one observed (spec §4.5, SPEC_FULL.md §0.5 "cumulative
/// digest-verification-failure count").
///
/// Shared between the background warming process (which calls
/// [`record_failure`](Self::record_failure) as chunks are verified against
/// the ZTOC) and the verification gate, which reads it exactly once, inside
/// its own state lock, at the `verify-toc` transition (spec §4.5: "the gate
/// holds a write lock over the prohibition flag and the error-load
/// operation so that a concurrent verification failure cannot be observed
/// as 'no error' while the flag is being set").
#[derive(Default)]
pub struct VerificationLatch {
    first_error: RwLock<Option<String>>,
    failure_count: AtomicU64,
}

impl VerificationLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a chunk-verification failure observed during warming. Only
    /// the first failure is retained as the surfaceable error; every
    /// failure increments the diagnostic counter.
    pub fn record_failure(&self, chunk_id: &str, err: &Error) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.first_error.write();
        if guard.is_none() {
            *guard = Some(format!("chunk {chunk_id}: {err}"));
        }
    }

    /// Total number of failures observed, latched or not.
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Read the latched error, if any, taking the same write lock
    /// `record_failure` takes so the read can never race a concurrent write.
    pub(crate) fn peek_under_write_lock(&self) -> Option<String> {
        let guard = self.first_error.write();
        guard.clone()
    }
}
