//! Error types for commit graph traversal.

use vault_object::ObjectError;
use vault_types::ChunkId;

/// Errors that can occur while walking history.
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// A commit referenced by a tip or parent link is not in the store.
    #[error("commit not found: {0}")]
    MissingCommit(ChunkId),

    /// The commit chunk could not be read or decoded.
    #[error("object error: {0}")]
    Object(#[from] ObjectError),
}

/// Convenience alias for DAG results.
pub type DagResult<T> = Result<T, DagError>;
