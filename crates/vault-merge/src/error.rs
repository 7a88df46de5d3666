//! Error types for merging.

use vault_dag::DagError;
use vault_diff::DiffError;
use vault_object::ObjectError;
use vault_types::ChunkId;

/// Errors that can occur while merging.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("diff error: {0}")]
    Diff(#[from] DiffError),

    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    #[error("history error: {0}")]
    Dag(#[from] DagError),

    /// The two commits share no history, so there is no merge base.
    #[error("no common ancestor between {ours} and {theirs}")]
    UnrelatedHistories { ours: ChunkId, theirs: ChunkId },

    /// The conflict resolver refused to pick a version.
    #[error("conflict at {path} not resolved: {reason}")]
    Unresolved { path: String, reason: String },
}

/// Convenience alias for merge results.
pub type MergeResult<T> = Result<T, MergeError>;
