//! Error types for the diff crate.

use vault_object::ObjectError;

/// Errors that can occur while diffing.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// Reading a directory node or commit failed.
    #[error("object error: {0}")]
    Object(#[from] ObjectError),
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
