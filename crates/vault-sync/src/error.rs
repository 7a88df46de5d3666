use thiserror::Error;
use vault_dag::DagError;
use vault_diff::DiffError;
use vault_log::LogError;
use vault_merge::MergeError;
use vault_object::ObjectError;
use vault_protocol::{ErrorCode, ProtocolError};
use vault_store::StoreError;
use vault_types::{ChunkId, TypeError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    #[error("diff error: {0}")]
    Diff(#[from] DiffError),

    #[error("history error: {0}")]
    Dag(#[from] DagError),

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("invalid branch: {0}")]
    InvalidBranch(#[from] TypeError),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("branch {0:?} has no commits")]
    EmptyBranch(String),

    #[error("remote did not send chunk {0}")]
    MissingChunk(ChunkId),

    #[error("chunk {0} does not match its hash")]
    HashMismatch(ChunkId),

    #[error("new tip {0} is not a commit in the upload or the store")]
    BadTip(ChunkId),

    #[error("remote error ({code}): {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// The code an `ERROR` frame reports for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::AccessDenied(_) => ErrorCode::AccessDenied,
            Self::Store(StoreError::NotFound(_)) | Self::EmptyBranch(_) => ErrorCode::NotFound,
            Self::InvalidBranch(_) | Self::HashMismatch(_) | Self::BadTip(_) => ErrorCode::Malformed,
            Self::Store(StoreError::HashMismatch { .. }) => ErrorCode::Malformed,
            Self::Protocol(ProtocolError::UnknownOpcode(_)) => ErrorCode::UnknownOpcode,
            Self::Protocol(ProtocolError::Malformed(_) | ProtocolError::TooLarge { .. }) => {
                ErrorCode::Malformed
            }
            Self::Remote { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
