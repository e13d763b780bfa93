use thiserror::Error;

/// Errors surfaced by the metadata store, file reader, and verification gate.
///
/// Every variant carries the context (operation name, inode id or path)
/// needed to satisfy the wrapping policy in the design: callers should never
/// need to re-derive "what were we doing" from a bare error kind.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{op}: reader closed")]
    Closed { op: &'static str },

    #[error("{op}: not found: {what}")]
    NotFound { op: &'static str, what: String },

    #[error("open_file({ino}): not a regular file")]
    NotRegularFile { ino: u32 },

    #[error("{op}: invalid offset {offset}")]
    InvalidOffset { op: &'static str, offset: i64 },

    #[error("open_file({ino}): short read: {message}")]
    ShortRead { ino: u32, message: String },

    #[error("verification failed: {0}")]
    VerificationFailed(String),

    #[error("invalid chunk digest {digest:?}: {reason}")]
    InvalidChunkDigest { digest: String, reason: String },

    #[error("ingest failed: {0}")]
    IngestFailed(String),

    #[error("{op}: reader already transitioned to a different terminal state")]
    AlreadyTransitioned { op: &'static str },

    #[error("inode id exhausted (32-bit space full)")]
    IdExhausted,

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(op: &'static str, what: impl Into<String>) -> Self {
        Error::NotFound { op, what: what.into() }
    }
}

impl From<Error> for String {
    fn from(e: Error) -> Self {
        e.to_string()
    }
}

#[cfg(feature = "sled-backend")]
impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Other(format!("kv store error: {e}"))
    }
}

#[cfg(feature = "sled-backend")]
impl From<sled::transaction::TransactionError<Error>> for Error {
    fn from(e: sled::transaction::TransactionError<Error>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(inner) => inner.into(),
        }
    }
}

/// Multiple close-time errors accumulated and returned together.
#[derive(Debug, Default)]
pub struct CloseErrors(pub Vec<Error>);

impl CloseErrors {
    pub fn push_result(&mut self, r: Result<(), Error>) {
        if let Err(e) = r {
            self.0.push(e);
        }
    }

    pub fn into_result(self) -> Result<(), CloseErrors> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for CloseErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error(s) during close: ", self.0.len())?;
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseErrors {}
