use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use vault_types::ChunkId;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ChunkSource, ChunkStore};

/// In-memory, HashMap-based chunk store.
///
/// Intended for tests and embedding. Chunks sit behind a `RwLock`; a
/// committed batch is inserted under a single write guard, so readers see
/// either none or all of it.
pub struct InMemoryChunkStore {
    chunks: RwLock<HashMap<ChunkId, Bytes>>,
}

impl InMemoryChunkStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of chunks currently stored.
    pub fn len(&self) -> usize {
        self.chunks.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes across all chunks.
    pub fn total_bytes(&self) -> u64 {
        self.chunks
            .read()
            .map(|m| m.values().map(|c| c.len() as u64).sum())
            .unwrap_or(0)
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkSource for InMemoryChunkStore {
    fn get(&self, id: &ChunkId) -> StoreResult<Bytes> {
        let map = self.chunks.read().map_err(|_| StoreError::Poisoned)?;
        map.get(id).cloned().ok_or(StoreError::NotFound(*id))
    }

    fn contains(&self, id: &ChunkId) -> StoreResult<bool> {
        let map = self.chunks.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.contains_key(id))
    }
}

impl ChunkStore for InMemoryChunkStore {
    fn commit_batch(&self, batch: Vec<(ChunkId, Bytes)>) -> StoreResult<usize> {
        let mut map = self.chunks.write().map_err(|_| StoreError::Poisoned)?;
        let mut written = 0;
        for (id, data) in batch {
            if let std::collections::hash_map::Entry::Vacant(slot) = map.entry(id) {
                slot.insert(data);
                written += 1;
            }
        }
        Ok(written)
    }

    fn ids(&self) -> StoreResult<Vec<ChunkId>> {
        let map = self.chunks.read().map_err(|_| StoreError::Poisoned)?;
        let mut ids: Vec<ChunkId> = map.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn get_many(&self, ids: &[ChunkId]) -> StoreResult<Vec<Option<Bytes>>> {
        let map = self.chunks.read().map_err(|_| StoreError::Poisoned)?;
        Ok(ids.iter().map(|id| map.get(id).cloned()).collect())
    }
}

impl std::fmt::Debug for InMemoryChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChunkStore")
            .field("chunk_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use crate::traits::ChunkSink;
    use std::sync::Arc;
    use vault_crypto::chunk_id;

    fn store_with(payloads: &[&'static [u8]]) -> (InMemoryChunkStore, Vec<ChunkId>) {
        let store = InMemoryChunkStore::new();
        let mut tx = Transaction::begin(&store);
        let ids = payloads
            .iter()
            .map(|p| tx.put(Bytes::from_static(p)).unwrap())
            .collect();
        tx.commit().unwrap();
        (store, ids)
    }

    // -----------------------------------------------------------------------
    // Reads and writes
    // -----------------------------------------------------------------------

    #[test]
    fn new_store_is_empty() {
        let store = InMemoryChunkStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert_eq!(store.total_bytes(), 0);
        assert!(store.ids().unwrap().is_empty());
    }

    #[test]
    fn committed_chunk_is_readable() {
        let (store, ids) = store_with(&[b"hello world"]);
        assert_eq!(ids[0], chunk_id(b"hello world"));
        assert_eq!(store.get(&ids[0]).unwrap(), Bytes::from_static(b"hello world"));
        assert!(store.contains(&ids[0]).unwrap());
    }

    #[test]
    fn absent_chunk_is_not_found() {
        let store = InMemoryChunkStore::new();
        let id = chunk_id(b"nope");
        assert!(!store.contains(&id).unwrap());
        match store.get(&id) {
            Err(StoreError::NotFound(missing)) => assert_eq!(missing, id),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_writes_are_stored_once() {
        let (store, ids) = store_with(&[b"same", b"same", b"other"]);
        assert_eq!(ids[0], ids[1]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.total_bytes(), 9);
        assert_eq!(store.commit_batch(vec![(ids[0], Bytes::from_static(b"same"))]).unwrap(), 0);
    }

    #[test]
    fn ids_are_sorted() {
        let (store, _) = store_with(&[b"a", b"b", b"c", b"d"]);
        let ids = store.ids().unwrap();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn get_many_reports_missing_as_none() {
        let (store, ids) = store_with(&[b"x"]);
        let missing = chunk_id(b"y");
        let got = store.get_many(&[ids[0], missing]).unwrap();
        assert_eq!(got, vec![Some(Bytes::from_static(b"x")), None]);
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_transactions_all_land() {
        let store = Arc::new(InMemoryChunkStore::new());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut tx = Transaction::begin(&*store);
                    for j in 0..16u8 {
                        tx.put(Bytes::from(vec![i, j])).unwrap();
                    }
                    tx.commit().unwrap()
                })
            })
            .collect();
        let written: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(written, 128);
        assert_eq!(store.len(), 128);
    }

    #[test]
    fn debug_shows_count() {
        let (store, _) = store_with(&[b"1", b"2"]);
        assert!(format!("{store:?}").contains("chunk_count: 2"));
    }
}
