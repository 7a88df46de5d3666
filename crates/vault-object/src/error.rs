use vault_crypto::SignatureError;
use vault_store::StoreError;
use vault_types::ChunkId;

use crate::kind::ObjectKind;

/// Errors from reading, writing or editing objects.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A chunk was found but is not the kind of object the caller expected.
    #[error("object {id} is a {actual}, expected a {expected}")]
    UnexpectedKind {
        id: ChunkId,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    /// The chunk's leading tag byte is not a known object kind.
    #[error("chunk {id} has unknown object tag {tag:#04x}")]
    UnknownTag { id: ChunkId, tag: u8 },

    /// The chunk is empty, so it carries no object tag.
    #[error("chunk {0} is empty")]
    Untagged(ChunkId),

    /// Encoding or decoding an object body failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// A directory entry name is not usable.
    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// Nothing is stored at the path.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// A path component that must be a directory is a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A path that must name a file names a directory.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// Chunking parameters are inconsistent.
    #[error("invalid chunk config: {0}")]
    InvalidConfig(String),

    #[error("signature error: {0}")]
    Signature(#[from] SignatureError),
}

/// Result alias for object operations.
pub type ObjectResult<T> = Result<T, ObjectError>;
