//! The [`BranchLog`] trait.

use vault_types::ChunkId;

use crate::entry::LogEntry;
use crate::error::{LogError, LogResult};

/// Longest log message an entry may carry. Messages travel to peers as
/// u16-prefixed strings, so nothing longer could ever be pushed.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Append-only history of one branch.
///
/// Implementations must be thread-safe and make each append atomic: a
/// reader sees the log either before or after an entry, never half of one.
/// Revisions are contiguous and start at 1. Messages longer than
/// [`MAX_MESSAGE_LEN`] bytes are refused with [`LogError::MessageTooLong`].
pub trait BranchLog: Send + Sync {
    /// All entries, oldest first.
    fn entries(&self) -> LogResult<Vec<LogEntry>>;

    /// The latest entry, or `None` for an empty branch.
    fn head(&self) -> LogResult<Option<LogEntry>>;

    /// Append an entry if the log is still at `expected` revision.
    ///
    /// Fails with [`LogError::RevisionMismatch`] otherwise, leaving the log
    /// untouched. The check and the append happen under one lock.
    fn compare_and_append(
        &self,
        expected: u64,
        entry_id: ChunkId,
        message: Vec<u8>,
    ) -> LogResult<LogEntry>;

    /// Current revision; 0 for an empty branch.
    fn revision(&self) -> LogResult<u64> {
        Ok(self.head()?.map_or(0, |e| e.revision))
    }

    /// Append unconditionally after the current tip.
    ///
    /// Only safe when the caller already serializes writers to this branch.
    fn append(&self, entry_id: ChunkId, message: Vec<u8>) -> LogResult<LogEntry> {
        let expected = self.revision()?;
        self.compare_and_append(expected, entry_id, message)
    }

    /// Entry at `revision`, if present.
    fn entry(&self, revision: u64) -> LogResult<Option<LogEntry>> {
        if revision == 0 {
            return Ok(None);
        }
        Ok(self
            .entries()?
            .into_iter()
            .find(|e| e.revision == revision))
    }

    /// Header of the current tip, or the empty string for an empty branch.
    fn tip_header(&self) -> LogResult<String> {
        Ok(self.head()?.map(|e| e.header()).unwrap_or_default())
    }
}

pub(crate) fn check_message(message: &[u8]) -> LogResult<()> {
    if message.len() > MAX_MESSAGE_LEN {
        return Err(LogError::MessageTooLong {
            len: message.len(),
            max: MAX_MESSAGE_LEN,
        });
    }
    Ok(())
}

pub(crate) fn check_revision(expected: u64, actual: u64) -> LogResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(LogError::RevisionMismatch { expected, actual })
    }
}
