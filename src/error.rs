use std::io;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors surfaced by the ledger engine.
///
/// The variants map onto the wire-level error kinds (`db/invalid-commit`,
/// `db/unavailable`, ...) so callers embedding the engine can translate them
/// without string matching.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Commit chain violation: bad `t` or `previous` pointer.
    #[error("invalid commit: {0}")]
    InvalidCommit(String),
    /// Internal invariant broken.
    #[error("unexpected error: {0}")]
    Unexpected(String),
    /// Catalog or publisher unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// No ledger registered under the alias.
    #[error("unknown ledger: {0}")]
    UnknownLedger(String),
    /// No content stored at the address.
    #[error("unknown address: {0}")]
    UnknownAddress(String),
    /// Time-travel target outside the ledger's history.
    #[error("invalid time: {0}")]
    InvalidTime(String),
    /// Attempt to create a ledger that already exists.
    #[error("ledger already exists: {0}")]
    LedgerExists(String),
    /// A blocking wait elapsed; the operation continues in the background.
    #[error("timeout: {0}")]
    Timeout(String),
    /// A single NDJSON line failed to parse; the stream continues.
    #[error("ndjson parse error on line {line}: {message}")]
    NdjsonParse {
        /// 1-based line number within the stream.
        line: usize,
        /// Parser diagnostic.
        message: String,
    },
    /// A publisher failed; `publish_to_all` logs this and carries on.
    #[error("publishing error: {0}")]
    Publishing(String),
    /// Encoding or decoding of a stored document failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Stored bytes do not decode to what their address promises.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// {0} not found.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Caller handed us something malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Password auth requested where none is configured.
    #[error("password authentication is not enabled")]
    NoPasswordAuth,
    /// Malformed client request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Credential token failed verification.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// I/O error from a file-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LedgerError {
    /// True when retrying against another replica could help.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

// Deferred handles deliver errors into shared promise cells, so the error
// must clone. `io::Error` is rebuilt from its kind and message.
impl Clone for LedgerError {
    fn clone(&self) -> Self {
        use LedgerError::*;
        match self {
            InvalidCommit(m) => InvalidCommit(m.clone()),
            Unexpected(m) => Unexpected(m.clone()),
            Unavailable(m) => Unavailable(m.clone()),
            UnknownLedger(m) => UnknownLedger(m.clone()),
            UnknownAddress(m) => UnknownAddress(m.clone()),
            InvalidTime(m) => InvalidTime(m.clone()),
            LedgerExists(m) => LedgerExists(m.clone()),
            Timeout(m) => Timeout(m.clone()),
            NdjsonParse { line, message } => NdjsonParse {
                line: *line,
                message: message.clone(),
            },
            Publishing(m) => Publishing(m.clone()),
            Serialization(m) => Serialization(m.clone()),
            Corruption(m) => Corruption(m.clone()),
            NotFound(what) => NotFound(*what),
            InvalidArgument(m) => InvalidArgument(m.clone()),
            NoPasswordAuth => NoPasswordAuth,
            InvalidRequest(m) => InvalidRequest(m.clone()),
            InvalidToken(m) => InvalidToken(m.clone()),
            Io(e) => Io(io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}
