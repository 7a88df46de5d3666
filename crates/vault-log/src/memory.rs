use std::sync::Mutex;

use tracing::debug;
use vault_types::ChunkId;

use crate::entry::LogEntry;
use crate::error::{LogError, LogResult};
use crate::traits::{check_message, check_revision, BranchLog};

/// A branch log held in a `Vec`. Data is lost when the log is dropped.
#[derive(Debug, Default)]
pub struct InMemoryBranchLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl InMemoryBranchLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BranchLog for InMemoryBranchLog {
    fn entries(&self) -> LogResult<Vec<LogEntry>> {
        let entries = self.entries.lock().map_err(|_| LogError::Poisoned)?;
        Ok(entries.clone())
    }

    fn head(&self) -> LogResult<Option<LogEntry>> {
        let entries = self.entries.lock().map_err(|_| LogError::Poisoned)?;
        Ok(entries.last().cloned())
    }

    fn compare_and_append(
        &self,
        expected: u64,
        entry_id: ChunkId,
        message: Vec<u8>,
    ) -> LogResult<LogEntry> {
        let mut entries = self.entries.lock().map_err(|_| LogError::Poisoned)?;
        check_message(&message)?;
        check_revision(expected, entries.len() as u64)?;
        let entry = LogEntry::new(expected + 1, entry_id, message);
        entries.push(entry.clone());
        debug!(revision = entry.revision, id = %entry_id, "log append");
        Ok(entry)
    }
}
