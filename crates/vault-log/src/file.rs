use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};
use vault_store::frame;
use vault_types::ChunkId;

use crate::entry::LogEntry;
use crate::error::{LogError, LogResult};
use crate::traits::{check_message, check_revision, BranchLog};

struct LogState {
    file: File,
    /// End of the last complete frame.
    len: u64,
    /// Set when a failed append could not be rolled back.
    dirty: bool,
    entries: Vec<LogEntry>,
}

/// A branch log persisted as CRC-framed bincode records, one per entry.
///
/// The whole log is cached in memory. On open a torn tail left by a crash is
/// truncated, so the surviving entries always form a contiguous prefix.
pub struct FileBranchLog {
    path: PathBuf,
    sync_on_append: bool,
    state: Mutex<LogState>,
}

impl FileBranchLog {
    /// Open (or create) the log file at `path`.
    pub fn open(path: &Path, sync_on_append: bool) -> LogResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let scan = frame::scan_frames(path)?;
        let mut entries = Vec::with_capacity(scan.frames.len());
        for frame in &scan.frames {
            let entry: LogEntry = bincode::deserialize(&frame.payload)
                .map_err(|e| LogError::Serialization(e.to_string()))?;
            let expected = entries.len() as u64 + 1;
            if entry.revision != expected {
                return Err(LogError::Corrupt {
                    offset: frame.offset,
                    reason: format!("revision {} where {expected} was expected", entry.revision),
                });
            }
            entries.push(entry);
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        if scan.has_torn_tail() {
            warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                file_len = scan.file_len,
                "truncating torn branch log tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }

        debug!(path = %path.display(), revision = entries.len(), "opened branch log");
        Ok(Self {
            path: path.to_path_buf(),
            sync_on_append,
            state: Mutex::new(LogState {
                file,
                len: scan.valid_len,
                dirty: false,
                entries,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BranchLog for FileBranchLog {
    fn entries(&self) -> LogResult<Vec<LogEntry>> {
        let state = self.state.lock().map_err(|_| LogError::Poisoned)?;
        Ok(state.entries.clone())
    }

    fn head(&self) -> LogResult<Option<LogEntry>> {
        let state = self.state.lock().map_err(|_| LogError::Poisoned)?;
        Ok(state.entries.last().cloned())
    }

    fn compare_and_append(
        &self,
        expected: u64,
        entry_id: ChunkId,
        message: Vec<u8>,
    ) -> LogResult<LogEntry> {
        let mut state = self.state.lock().map_err(|_| LogError::Poisoned)?;
        if state.dirty {
            return Err(LogError::Corrupt {
                offset: state.len,
                reason: "log ends in a partial entry that could not be removed; reopen the log".into(),
            });
        }
        check_message(&message)?;
        check_revision(expected, state.entries.len() as u64)?;

        let entry = LogEntry::new(expected + 1, entry_id, message);
        let payload =
            bincode::serialize(&entry).map_err(|e| LogError::Serialization(e.to_string()))?;
        let end = state.len;
        let written = match frame::append_durable(&mut state.file, end, &payload, self.sync_on_append) {
            Ok(written) => written,
            Err(e) => {
                state.dirty = !e.rolled_back;
                return Err(e.source.into());
            }
        };
        state.len += written as u64;
        state.entries.push(entry.clone());

        debug!(
            path = %self.path.display(),
            revision = entry.revision,
            id = %entry_id,
            "log append"
        );
        Ok(entry)
    }
}

impl std::fmt::Debug for FileBranchLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBranchLog")
            .field("path", &self.path)
            .finish()
    }
}
