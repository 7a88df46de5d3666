use vault_types::ChunkId;

/// Errors from chunk store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested chunk is not in the store.
    #[error("chunk not found: {0}")]
    NotFound(ChunkId),

    /// Bytes handed to the store do not hash to the id they were filed under.
    #[error("hash mismatch: chunk filed as {expected} hashes to {computed}")]
    HashMismatch { expected: ChunkId, computed: ChunkId },

    /// I/O error from the underlying medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk data failed validation.
    #[error("corrupt store data at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// Another handle, usually in another process, has the store open.
    #[error("store at {} is in use by another process", .0.display())]
    Locked(std::path::PathBuf),

    /// A lock guarding store state was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
