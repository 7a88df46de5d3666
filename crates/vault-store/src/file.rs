use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use bytes::Bytes;
use fs2::FileExt;
use tracing::{debug, info, warn};
use vault_crypto::chunk_id;
use vault_types::{ChunkId, HASH_LEN};

use crate::error::{StoreError, StoreResult};
use crate::frame::{self, HEADER_SIZE};
use crate::traits::{ChunkSource, ChunkStore};

/// Name of the pack log inside the store directory.
pub const PACK_FILE: &str = "chunks.pack";

/// Lock file held exclusively for as long as a store is open.
pub const LOCK_FILE: &str = "LOCK";

/// Per-chunk header inside a batch frame: 32-byte id + u32 length.
const ENTRY_HEADER: usize = HASH_LEN + 4;

/// Configuration for [`FileChunkStore`].
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// `fsync` the pack log before a committed batch becomes visible.
    pub sync_on_commit: bool,
    /// Re-hash every chunk read from disk and fail with `Corrupt` on mismatch.
    pub verify_reads: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            verify_reads: false,
        }
    }
}

/// Location of a chunk payload in the pack log.
#[derive(Clone, Copy, Debug)]
struct Slot {
    offset: u64,
    len: u32,
}

struct PackWriter {
    file: File,
    offset: u64,
    /// Set when a failed append could not be rolled back.
    dirty: bool,
}

/// Durable chunk store backed by a single append-only pack log.
///
/// Every committed batch is written as one CRC-checked frame:
/// ```text
/// frame payload = [u32 count] { [32 bytes id] [u32 len] [len bytes] }*
/// ```
/// A batch is either entirely in a valid frame or entirely in the torn tail,
/// which is what makes commits atomic across crashes. The in-memory index
/// is rebuilt by scanning the log on open; a torn tail is truncated away.
///
/// The index caches pack offsets, so only one handle may have the store
/// open at a time. `open` takes an exclusive lock on `LOCK` in the store
/// directory and fails with [`StoreError::Locked`] while another holds it.
pub struct FileChunkStore {
    path: PathBuf,
    config: FileStoreConfig,
    index: RwLock<HashMap<ChunkId, Slot>>,
    writer: Mutex<PackWriter>,
    reader: Mutex<File>,
    _lock: File,
}

impl FileChunkStore {
    /// Open (or create) a store in `dir`.
    pub fn open(dir: &Path, config: FileStoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        let lock = lock_dir(dir)?;
        let path = dir.join(PACK_FILE);

        let scan = frame::scan_frames(&path)?;
        let mut index = HashMap::new();
        for frame in &scan.frames {
            for (id, slot) in decode_batch(frame.payload_offset(), &frame.payload)? {
                index.insert(id, slot);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        if scan.has_torn_tail() {
            warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                file_len = scan.file_len,
                "truncating torn pack tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        let reader = File::open(&path)?;

        info!(
            path = %path.display(),
            chunks = index.len(),
            batches = scan.frames.len(),
            "opened chunk store"
        );

        Ok(Self {
            path,
            config,
            index: RwLock::new(index),
            writer: Mutex::new(PackWriter {
                file,
                offset: scan.valid_len,
                dirty: false,
            }),
            reader: Mutex::new(reader),
            _lock: lock,
        })
    }

    /// Path of the pack log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of chunks in the store.
    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.len()).unwrap_or(0)
    }

    /// Returns `true` if the store holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: &ChunkId) -> StoreResult<Option<Slot>> {
        let index = self.index.read().map_err(|_| StoreError::Poisoned)?;
        Ok(index.get(id).copied())
    }

    fn read_slot(&self, id: &ChunkId, slot: Slot) -> StoreResult<Bytes> {
        let mut buf = vec![0u8; slot.len as usize];
        {
            let mut reader = self.reader.lock().map_err(|_| StoreError::Poisoned)?;
            reader.seek(SeekFrom::Start(slot.offset))?;
            reader.read_exact(&mut buf)?;
        }
        if self.config.verify_reads {
            let computed = chunk_id(&buf);
            if computed != *id {
                return Err(StoreError::Corrupt {
                    offset: slot.offset,
                    reason: format!("chunk {id} hashes to {computed}"),
                });
            }
        }
        Ok(Bytes::from(buf))
    }
}

impl ChunkSource for FileChunkStore {
    fn get(&self, id: &ChunkId) -> StoreResult<Bytes> {
        match self.slot(id)? {
            Some(slot) => self.read_slot(id, slot),
            None => Err(StoreError::NotFound(*id)),
        }
    }

    fn contains(&self, id: &ChunkId) -> StoreResult<bool> {
        Ok(self.slot(id)?.is_some())
    }
}

impl ChunkStore for FileChunkStore {
    fn commit_batch(&self, batch: Vec<(ChunkId, Bytes)>) -> StoreResult<usize> {
        // Holding the writer for the whole commit serializes committers.
        let mut writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        if writer.dirty {
            return Err(StoreError::Corrupt {
                offset: writer.offset,
                reason: "pack ends in a partial batch that could not be removed; reopen the store".into(),
            });
        }

        let fresh: Vec<(ChunkId, Bytes)> = {
            let index = self.index.read().map_err(|_| StoreError::Poisoned)?;
            let mut seen = HashSet::new();
            batch
                .into_iter()
                .filter(|(id, _)| !index.contains_key(id) && seen.insert(*id))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }

        let payload = encode_batch(&fresh)?;
        let frame_offset = writer.offset;
        let written = match frame::append_durable(
            &mut writer.file,
            frame_offset,
            &payload,
            self.config.sync_on_commit,
        ) {
            Ok(written) => written,
            Err(e) => {
                writer.dirty = !e.rolled_back;
                return Err(e.source.into());
            }
        };
        writer.offset += written as u64;

        let slots = decode_batch(frame_offset + HEADER_SIZE as u64, &payload)?;
        let count = slots.len();
        {
            let mut index = self.index.write().map_err(|_| StoreError::Poisoned)?;
            index.extend(slots);
        }

        debug!(
            offset = frame_offset,
            chunks = count,
            bytes = written,
            "committed chunk batch"
        );
        Ok(count)
    }

    fn ids(&self) -> StoreResult<Vec<ChunkId>> {
        let index = self.index.read().map_err(|_| StoreError::Poisoned)?;
        let mut ids: Vec<ChunkId> = index.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

impl std::fmt::Debug for FileChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChunkStore")
            .field("path", &self.path)
            .field("chunk_count", &self.len())
            .finish()
    }
}

/// Take the store's exclusive lock, failing fast if another handle has it.
fn lock_dir(dir: &Path) -> StoreResult<File> {
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)?;
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(StoreError::Locked(path)),
        Err(e) => Err(e.into()),
    }
}

fn encode_batch(chunks: &[(ChunkId, Bytes)]) -> StoreResult<Vec<u8>> {
    let body: usize = chunks.iter().map(|(_, d)| ENTRY_HEADER + d.len()).sum();
    let mut out = Vec::with_capacity(4 + body);
    out.extend_from_slice(&(chunks.len() as u32).to_be_bytes());
    for (id, data) in chunks {
        let len = u32::try_from(data.len()).map_err(|_| StoreError::Corrupt {
            offset: 0,
            reason: format!("chunk {id} of {} bytes is too large", data.len()),
        })?;
        out.extend_from_slice(id.as_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(data);
    }
    Ok(out)
}

/// Decode a batch payload found at `base` in the pack log into chunk slots.
fn decode_batch(base: u64, payload: &[u8]) -> StoreResult<Vec<(ChunkId, Slot)>> {
    let corrupt = |at: usize, reason: &str| StoreError::Corrupt {
        offset: base + at as u64,
        reason: reason.to_string(),
    };

    let count_bytes: [u8; 4] = payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| corrupt(0, "batch shorter than its count"))?;
    let count = u32::from_be_bytes(count_bytes) as usize;

    let mut slots = Vec::with_capacity(count.min(payload.len() / ENTRY_HEADER));
    let mut pos = 4;
    for _ in 0..count {
        let header = payload
            .get(pos..pos + ENTRY_HEADER)
            .ok_or_else(|| corrupt(pos, "truncated chunk header"))?;
        let id = ChunkId::from_slice(&header[..HASH_LEN])
            .map_err(|e| corrupt(pos, &e.to_string()))?;
        let len_bytes: [u8; 4] = header[HASH_LEN..]
            .try_into()
            .map_err(|_| corrupt(pos, "bad chunk length"))?;
        let len = u32::from_be_bytes(len_bytes);
        let start = pos + ENTRY_HEADER;
        let end = start + len as usize;
        if end > payload.len() {
            return Err(corrupt(pos, "chunk runs past end of batch"));
        }
        slots.push((
            id,
            Slot {
                offset: base + start as u64,
                len,
            },
        ));
        pos = end;
    }
    if pos != payload.len() {
        return Err(corrupt(pos, "trailing bytes after last chunk"));
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChunkSink;
    use crate::transaction::Transaction;

    fn open(dir: &Path) -> FileChunkStore {
        FileChunkStore::open(dir, FileStoreConfig::default()).unwrap()
    }

    fn commit(store: &FileChunkStore, payloads: &[&'static [u8]]) -> Vec<ChunkId> {
        let mut tx = Transaction::begin(store);
        let ids = payloads
            .iter()
            .map(|p| tx.put(Bytes::from_static(p)).unwrap())
            .collect();
        tx.commit().unwrap();
        ids
    }

    #[test]
    fn write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let ids = commit(&store, &[b"alpha", b"beta", b""]);

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&ids[0]).unwrap(), Bytes::from_static(b"alpha"));
        assert_eq!(store.get(&ids[1]).unwrap(), Bytes::from_static(b"beta"));
        assert_eq!(store.get(&ids[2]).unwrap(), Bytes::new());
        assert!(matches!(
            store.get(&chunk_id(b"gamma")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn chunks_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ids = {
            let store = open(dir.path());
            let mut ids = commit(&store, &[b"one", b"two"]);
            ids.extend(commit(&store, &[b"three"]));
            ids
        };

        let store = open(dir.path());
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&ids[2]).unwrap(), Bytes::from_static(b"three"));
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(store.ids().unwrap(), expected);
    }

    #[test]
    fn duplicate_chunks_are_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        commit(&store, &[b"dup"]);
        let size = fs::metadata(store.path()).unwrap().len();

        let id = chunk_id(b"dup");
        let written = store
            .commit_batch(vec![(id, Bytes::from_static(b"dup")), (id, Bytes::from_static(b"dup"))])
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(fs::metadata(store.path()).unwrap().len(), size);
    }

    #[test]
    fn torn_batch_is_dropped_whole() {
        let dir = tempfile::tempdir().unwrap();
        let (kept, torn) = {
            let store = open(dir.path());
            let kept = commit(&store, &[b"durable"]);
            let torn = commit(&store, &[b"first half", b"second half"]);
            (kept, torn)
        };

        let path = dir.path().join(PACK_FILE);
        let full = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full - 3).unwrap();
        drop(file);

        let store = open(dir.path());
        assert!(store.contains(&kept[0]).unwrap());
        assert!(!store.contains(&torn[0]).unwrap());
        assert!(!store.contains(&torn[1]).unwrap());

        // The torn tail was cut off, so new batches append cleanly.
        let again = commit(&store, &[b"after recovery"]);
        drop(store);
        let store = open(dir.path());
        assert_eq!(
            store.get(&again[0]).unwrap(),
            Bytes::from_static(b"after recovery")
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn second_open_is_refused_while_first_is_live() {
        let dir = tempfile::tempdir().unwrap();
        let first = open(dir.path());
        let ids = commit(&first, &[b"written by the first handle"]);

        let err = FileChunkStore::open(dir.path(), FileStoreConfig::default()).unwrap_err();
        assert!(matches!(err, StoreError::Locked(_)));
        assert!(err.to_string().contains("in use"));

        drop(first);
        let second = open(dir.path());
        assert_eq!(
            second.get(&ids[0]).unwrap(),
            Bytes::from_static(b"written by the first handle")
        );
    }

    #[test]
    fn commit_after_cut_back_tail_indexes_correct_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        commit(&store, &[b"before"]);

        // A failed append leaves garbage that append_durable cuts back; the
        // writer offset must still match the end of the file afterwards.
        {
            let mut writer = store.writer.lock().unwrap();
            let end = writer.offset;
            writer.file.write_all(&[7u8; 100]).unwrap();
            frame::FrameFile::truncate(&mut writer.file, end).unwrap();
        }
        let ids = commit(&store, &[b"hello world"]);
        assert_eq!(store.get(&ids[0]).unwrap(), Bytes::from_static(b"hello world"));

        drop(store);
        let store = open(dir.path());
        assert_eq!(store.get(&ids[0]).unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn dirty_writer_refuses_commits() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        store.writer.lock().unwrap().dirty = true;
        let err = store
            .commit_batch(vec![(chunk_id(b"x"), Bytes::from_static(b"x"))])
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
        assert!(!store.contains(&chunk_id(b"x")).unwrap());
    }

    #[test]
    fn verify_reads_detects_bit_rot() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = open(dir.path());
            commit(&store, &[b"pristine"])[0]
        };

        // Flip a payload byte and rewrite the frame CRC so the scan accepts it.
        let path = dir.path().join(PACK_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let crc = crc32fast::hash(&bytes[HEADER_SIZE..]);
        bytes[4..8].copy_from_slice(&crc.to_be_bytes());
        fs::write(&path, &bytes).unwrap();

        let config = FileStoreConfig {
            verify_reads: true,
            ..FileStoreConfig::default()
        };
        let store = FileChunkStore::open(dir.path(), config).unwrap();
        assert!(matches!(store.get(&id), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn batch_codec_rejects_trailing_bytes() {
        let mut payload = encode_batch(&[(chunk_id(b"x"), Bytes::from_static(b"x"))]).unwrap();
        payload.push(0);
        assert!(matches!(
            decode_batch(0, &payload),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
