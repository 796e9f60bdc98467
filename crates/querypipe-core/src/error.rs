use std::io;
use thiserror::Error;

/// Coarse classification of a [`PipelineError`].
///
/// Retry and transaction logic branch on this instead of on the concrete
/// variant so that every wrapper agrees on what "transient" means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store unreachable or refused a handle. Never retried.
    Connection,
    /// Expected to clear up on its own (lock contention, busy store).
    Transient,
    /// Constraint violation. Never retried, rolls back a transaction.
    Integrity,
    /// Any other permanent failure.
    Permanent,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transient store error ({code}): {message}")]
    Transient { code: String, message: String },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock acquisition timed out after {timeout_ms}ms")]
    LockTimeout { timeout_ms: u64 },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Build a transient error from a store error code and message.
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Connection(_) => ErrorKind::Connection,
            PipelineError::Transient { .. } | PipelineError::LockTimeout { .. } => {
                ErrorKind::Transient
            }
            PipelineError::Integrity(_) => ErrorKind::Integrity,
            _ => ErrorKind::Permanent,
        }
    }

    /// Whether a retry policy may re-invoke the failed operation.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_integrity(&self) -> bool {
        self.kind() == ErrorKind::Integrity
    }

    pub fn is_connection(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

// Caller-defined errors:
//
// A unit of work may fail with its own error type. Anything implementing
// `std::error::Error + Send + Sync + 'static` converts into
// `PipelineError::Other` through anyhow and travels through every wrapper
// unchanged. It is classified as permanent, so it is never retried but does
// roll back an enclosing transaction.
