use std::sync::Arc;

use bytes::Bytes;
use vault_types::ChunkId;

use crate::error::StoreResult;

/// Read access to chunks.
///
/// Implemented by every store and by [`Transaction`](crate::Transaction), so
/// object-model code can read committed chunks and staged ones through the
/// same interface.
pub trait ChunkSource {
    /// Read a chunk. Fails with `NotFound` if it is absent.
    fn get(&self, id: &ChunkId) -> StoreResult<Bytes>;

    /// Check whether a chunk is present.
    fn contains(&self, id: &ChunkId) -> StoreResult<bool>;
}

/// Write access to chunks, available inside a transaction.
pub trait ChunkSink: ChunkSource {
    /// Stage `data` and return its content hash. Idempotent.
    fn put(&mut self, data: Bytes) -> StoreResult<ChunkId>;
}

/// Durable hash-keyed chunk store.
///
/// Invariants every backend upholds:
/// - Content addressing: a chunk is filed under the hash of its bytes, and
///   writing the same bytes twice stores them once.
/// - Atomic batches: every chunk of a [`commit_batch`](Self::commit_batch)
///   call becomes visible to readers at the same instant, or none does.
/// - Commits are serialized; concurrent readers are always safe.
pub trait ChunkStore: ChunkSource + Send + Sync {
    /// Make a batch of already-verified chunks visible atomically.
    ///
    /// Called by [`Transaction::commit`](crate::Transaction::commit); the
    /// transaction has checked every hash. Returns how many chunks were new.
    fn commit_batch(&self, batch: Vec<(ChunkId, Bytes)>) -> StoreResult<usize>;

    /// All chunk ids in the store, sorted.
    fn ids(&self) -> StoreResult<Vec<ChunkId>>;

    /// Read several chunks; absent ids yield `None`.
    fn get_many(&self, ids: &[ChunkId]) -> StoreResult<Vec<Option<Bytes>>> {
        ids.iter()
            .map(|id| {
                if self.contains(id)? {
                    self.get(id).map(Some)
                } else {
                    Ok(None)
                }
            })
            .collect()
    }
}

impl<S: ChunkSource + ?Sized> ChunkSource for &S {
    fn get(&self, id: &ChunkId) -> StoreResult<Bytes> {
        (**self).get(id)
    }

    fn contains(&self, id: &ChunkId) -> StoreResult<bool> {
        (**self).contains(id)
    }
}

impl<S: ChunkSource + ?Sized> ChunkSource for Arc<S> {
    fn get(&self, id: &ChunkId) -> StoreResult<Bytes> {
        (**self).get(id)
    }

    fn contains(&self, id: &ChunkId) -> StoreResult<bool> {
        (**self).contains(id)
    }
}
