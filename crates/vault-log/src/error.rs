//! Error types for branch log operations.

use thiserror::Error;

/// Errors that can occur while reading or appending to a branch log.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log tip moved since the caller read it.
    #[error("revision mismatch: expected {expected}, log is at {actual}")]
    RevisionMismatch { expected: u64, actual: u64 },

    /// The entry message is longer than a peer could receive.
    #[error("log message of {len} bytes exceeds the {max}-byte limit")]
    MessageTooLong { len: usize, max: usize },

    /// A log entry header could not be parsed.
    #[error("invalid log header {header:?}: {reason}")]
    InvalidHeader { header: String, reason: String },

    /// On-disk log data failed validation.
    #[error("corrupt log at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A lock guarding the log was poisoned.
    #[error("log lock poisoned")]
    Poisoned,

    /// I/O error from the log file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for log operations.
pub type LogResult<T> = std::result::Result<T, LogError>;
