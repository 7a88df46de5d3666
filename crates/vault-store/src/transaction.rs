use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::debug;
use vault_crypto::chunk_id;
use vault_types::ChunkId;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ChunkSink, ChunkSource, ChunkStore};

/// A scoped write batch against a [`ChunkStore`].
///
/// Chunks put into a transaction are readable through it immediately but
/// stay invisible to every other reader until [`commit`](Self::commit)
/// returns. Dropping a transaction without committing discards its chunks.
pub struct Transaction<'s> {
    store: &'s dyn ChunkStore,
    staged: BTreeMap<ChunkId, Bytes>,
}

impl<'s> Transaction<'s> {
    /// Open a transaction on `store`.
    pub fn begin(store: &'s dyn ChunkStore) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
        }
    }

    /// Stage a chunk under a caller-supplied id.
    ///
    /// The id is checked against the hash of `data`. Returns `false` when the
    /// chunk is already staged or already in the store.
    pub fn put_chunk(&mut self, id: ChunkId, data: Bytes) -> StoreResult<bool> {
        let computed = chunk_id(&data);
        if computed != id {
            return Err(StoreError::HashMismatch {
                expected: id,
                computed,
            });
        }
        if self.staged.contains_key(&id) || self.store.contains(&id)? {
            return Ok(false);
        }
        self.staged.insert(id, data);
        Ok(true)
    }

    /// Number of chunks waiting to be committed.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Returns `true` if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Ids of the staged chunks, in order.
    pub fn staged_ids(&self) -> impl Iterator<Item = &ChunkId> {
        self.staged.keys()
    }

    /// The store this transaction writes into.
    pub fn store(&self) -> &'s dyn ChunkStore {
        self.store
    }

    /// Publish every staged chunk atomically. Returns how many were new to the store.
    pub fn commit(mut self) -> StoreResult<usize> {
        let batch: Vec<(ChunkId, Bytes)> = std::mem::take(&mut self.staged).into_iter().collect();
        if batch.is_empty() {
            return Ok(0);
        }
        let staged = batch.len();
        let written = self.store.commit_batch(batch)?;
        debug!(staged, written, "transaction committed");
        Ok(written)
    }

    /// Discard every staged chunk.
    pub fn rollback(mut self) {
        let discarded = std::mem::take(&mut self.staged).len();
        debug!(discarded, "transaction rolled back");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            debug!(
                discarded = self.staged.len(),
                "transaction dropped without commit"
            );
        }
    }
}

impl ChunkSource for Transaction<'_> {
    fn get(&self, id: &ChunkId) -> StoreResult<Bytes> {
        match self.staged.get(id) {
            Some(data) => Ok(data.clone()),
            None => self.store.get(id),
        }
    }

    fn contains(&self, id: &ChunkId) -> StoreResult<bool> {
        if self.staged.contains_key(id) {
            return Ok(true);
        }
        self.store.contains(id)
    }
}

impl ChunkSink for Transaction<'_> {
    fn put(&mut self, data: Bytes) -> StoreResult<ChunkId> {
        let id = chunk_id(&data);
        if !self.staged.contains_key(&id) && !self.store.contains(&id)? {
            self.staged.insert(id, data);
        }
        Ok(id)
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("staged", &self.staged.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryChunkStore;

    #[test]
    fn staged_chunks_are_invisible_until_commit() {
        let store = InMemoryChunkStore::new();
        let mut tx = Transaction::begin(&store);
        let id = tx.put(Bytes::from_static(b"pending")).unwrap();

        assert!(tx.contains(&id).unwrap());
        assert_eq!(tx.get(&id).unwrap(), Bytes::from_static(b"pending"));
        assert!(!store.contains(&id).unwrap());

        assert_eq!(tx.commit().unwrap(), 1);
        assert_eq!(store.get(&id).unwrap(), Bytes::from_static(b"pending"));
    }

    #[test]
    fn dropped_transaction_discards_chunks() {
        let store = InMemoryChunkStore::new();
        let id = {
            let mut tx = Transaction::begin(&store);
            tx.put(Bytes::from_static(b"lost")).unwrap()
        };
        assert!(!store.contains(&id).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn rollback_discards_chunks() {
        let store = InMemoryChunkStore::new();
        let mut tx = Transaction::begin(&store);
        let id = tx.put(Bytes::from_static(b"undo")).unwrap();
        tx.rollback();
        assert!(!store.contains(&id).unwrap());
    }

    #[test]
    fn put_chunk_verifies_hash() {
        let store = InMemoryChunkStore::new();
        let mut tx = Transaction::begin(&store);
        let wrong = chunk_id(b"something else");
        let err = tx
            .put_chunk(wrong, Bytes::from_static(b"payload"))
            .unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
        assert!(tx.is_empty());
    }

    #[test]
    fn put_skips_chunks_already_in_store() {
        let store = InMemoryChunkStore::new();
        let mut first = Transaction::begin(&store);
        let id = first.put(Bytes::from_static(b"shared")).unwrap();
        first.commit().unwrap();

        let mut second = Transaction::begin(&store);
        assert!(!second
            .put_chunk(id, Bytes::from_static(b"shared"))
            .unwrap());
        assert_eq!(second.put(Bytes::from_static(b"shared")).unwrap(), id);
        assert!(second.is_empty());
        assert_eq!(second.commit().unwrap(), 0);
    }

    #[test]
    fn reads_fall_through_to_store() {
        let store = InMemoryChunkStore::new();
        let mut seed = Transaction::begin(&store);
        let id = seed.put(Bytes::from_static(b"committed")).unwrap();
        seed.commit().unwrap();

        let tx = Transaction::begin(&store);
        assert_eq!(tx.get(&id).unwrap(), Bytes::from_static(b"committed"));
        let missing = chunk_id(b"missing");
        assert!(matches!(tx.get(&missing), Err(StoreError::NotFound(_))));
    }
}
