//! One-shot initialization barrier: queries issued before ingestion
//! completes block until it does; ingestion itself is not reentrant.
//!
//! `once_cell`/`std::sync::OnceLock` give single-initialization semantics but
//! no way for a second thread to block until the first thread's write
//! actually lands — they only guard against redundant execution. A
//! `Mutex`+`Condvar` latch, handing off state between phased stages the way
//! this crate's own ingest pipeline does, gives the required blocking wait.

use std::sync::{Condvar, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Pending,
    Done(Result<(), String>),
}

/// Blocks callers until [`InitBarrier::signal`] has been called once.
pub struct InitBarrier {
    state: Mutex<State>,
    cond: Condvar,
}

impl InitBarrier {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::Pending), cond: Condvar::new() }
    }

    /// Block the caller until ingestion has signaled. Returns the ingest
    /// outcome; an ingest failure is reported to every waiter.
    pub fn wait(&self) -> Result<(), crate::error::Error> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while matches!(*guard, State::Pending) {
            guard = self.cond.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
        match &*guard {
            State::Done(Ok(())) => Ok(()),
            State::Done(Err(msg)) => Err(crate::error::Error::IngestFailed(msg.clone())),
            State::Pending => unreachable!(),
        }
    }

    /// Signal completion. Only the first call has any effect; later calls
    /// are ignored (ingestion runs exactly once per reader).
    pub fn signal(&self, result: Result<(), crate::error::Error>) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(*guard, State::Pending) {
            *guard = State::Done(result.map_err(|e| e.to_string()));
            self.cond.notify_all();
        }
    }

    /// True once ingestion has signaled, regardless of outcome.
    pub fn is_done(&self) -> bool {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        !matches!(*guard, State::Pending)
    }
}

impl Default for InitBarrier {
    fn default() -> Self {
        Self::new()
    }
}
