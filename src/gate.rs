//! Verification gate: the only externally visible object until the caller
//! either skips verification or presents a root digest.
//!
//! ```text
//!         [warming]
//!          |  \
//!    skip  |   \ verify-toc(d)
//!          v    v
//!     [serving-unverified]  [serving-verified]
//!          \    /
//!           v v
//!          [closed]
//! ```
//!
//! Transitions out of `warming` are one-shot: the first `skip_verify` or
//! `verify_toc` call decides the outcome and every later call returns the
//! same decision — `verify_toc` called twice returns the same reader, or
//! the second call observes the latched error.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::verify::VerificationLatch;

/// Owns a reader until the caller transitions out of `warming`. The reader
/// itself is stored separately from `State`
/// (rather than inside e.g. a `Serving(R)` variant) so it's available to
/// hand back regardless of which state is current.
pub struct VerificationGate<R> {
    reader: R,
    state: Mutex<State>,
    latch: Arc<VerificationLatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Warming,
    ServingUnverified,
    ServingVerified,
    Closed,
}

impl<R: Clone> VerificationGate<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, state: Mutex::new(State::Warming), latch: Arc::new(VerificationLatch::new()) }
    }

    pub fn latch(&self) -> Arc<VerificationLatch> {
        Arc::clone(&self.latch)
    }

    /// The wrapped reader, available regardless of gate state. Used for
    /// operations the spec answers independently of the warming transition
    /// (`metadata()`) or that must reach the reader even once closed
    /// (`close()`).
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Returns the unwrapped reader; caller explicitly opts out of digest
    /// verification. One-shot like `verify_toc`: once the gate has already
    /// settled on `serving-verified`, `skip_verify` cannot flip it back (no
    /// such edge in the state diagram above).
    pub fn skip_verify(&self) -> Result<R, Error> {
        let mut guard = self.state.lock();
        match *guard {
            State::Closed => Err(Error::Closed { op: "skip_verify" }),
            State::ServingVerified => Err(Error::AlreadyTransitioned { op: "skip_verify" }),
            State::ServingUnverified => Ok(self.reader.clone()),
            State::Warming => {
                *guard = State::ServingUnverified;
                Ok(self.reader.clone())
            }
        }
    }

    /// Atomically marks the reader as verification-required and returns it,
    /// unless a warming-phase chunk-verification failure was latched —
    /// `expected_digest` tags the caller's chosen root digest (used by the
    /// surrounding `Reader` to label subsequent chunk reads as requiring
    /// verification; this gate only owns the warming-failure race, not the
    /// per-chunk verify path itself). One-shot: once `skip_verify` has
    /// already settled the gate on `serving-unverified`, `verify_toc` cannot
    /// flip it to `serving-verified` (no such edge in the state diagram
    /// above) — the two calls are mutually exclusive ways out of `warming`.
    pub fn verify_toc(&self, expected_digest: &str) -> Result<R, Error> {
        let _ = expected_digest;
        let mut guard = self.state.lock();
        match *guard {
            State::Closed => return Err(Error::Closed { op: "verify_toc" }),
            State::ServingVerified => return Ok(self.reader.clone()),
            State::ServingUnverified => return Err(Error::AlreadyTransitioned { op: "verify_toc" }),
            State::Warming => {}
        }

        // Race-free: the write lock on `state` above already excludes
        // concurrent transitions; reading the latch under its own write
        // lock additionally excludes a `record_failure` call from landing
        // "between" this read and the state write below.
        if let Some(msg) = self.latch.peek_under_write_lock() {
            return Err(Error::VerificationFailed(msg));
        }

        *guard = State::ServingVerified;
        Ok(self.reader.clone())
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), State::Closed)
    }

    pub fn close(&self) {
        *self.state.lock() = State::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_verify_returns_reader_and_is_idempotent() {
        let gate = VerificationGate::new(42u32);
        assert_eq!(gate.skip_verify().unwrap(), 42);
        assert_eq!(gate.skip_verify().unwrap(), 42);
    }

    #[test]
    fn verify_toc_surfaces_latched_warming_failure() {
        let gate = VerificationGate::new(42u32);
        gate.latch().record_failure("chunk-3", &Error::VerificationFailed("mismatch".into()));
        let err = gate.verify_toc("sha256:deadbeef").unwrap_err();
        assert!(matches!(err, Error::VerificationFailed(_)));
        // Scenario 5 (spec §8): the second call observes the same latched error.
        assert!(gate.verify_toc("sha256:deadbeef").is_err());
    }

    #[test]
    fn verify_toc_succeeds_with_no_latched_failure() {
        let gate = VerificationGate::new("reader".to_string());
        assert_eq!(gate.verify_toc("sha256:abc").unwrap(), "reader");
        // Idempotent: second call returns the same reader (spec §8 invariant 5).
        assert_eq!(gate.verify_toc("sha256:abc").unwrap(), "reader");
    }

    #[test]
    fn operations_after_close_fail_closed() {
        let gate = VerificationGate::new(1u32);
        gate.close();
        assert!(matches!(gate.skip_verify(), Err(Error::Closed { .. })));
        assert!(matches!(gate.verify_toc("d"), Err(Error::Closed { .. })));
    }

    #[test]
    fn verify_toc_after_skip_verify_is_rejected() {
        let gate = VerificationGate::new(42u32);
        gate.skip_verify().unwrap();
        assert!(matches!(gate.verify_toc("sha256:abc"), Err(Error::AlreadyTransitioned { .. })));
    }

    #[test]
    fn skip_verify_after_verify_toc_is_rejected() {
        let gate = VerificationGate::new(42u32);
        gate.verify_toc("sha256:abc").unwrap();
        assert!(matches!(gate.skip_verify(), Err(Error::AlreadyTransitioned { .. })));
    }
}
