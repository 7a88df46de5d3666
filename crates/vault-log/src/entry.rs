use serde::{Deserialize, Serialize};
use vault_types::ChunkId;

use crate::error::{LogError, LogResult};

/// One record of a branch log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, starting at 1.
    pub revision: u64,
    /// Content hash of the commit that became the tip.
    pub entry_id: ChunkId,
    /// Opaque message supplied by the writer.
    pub message: Vec<u8>,
}

impl LogEntry {
    pub fn new(revision: u64, entry_id: ChunkId, message: impl Into<Vec<u8>>) -> Self {
        Self {
            revision,
            entry_id,
            message: message.into(),
        }
    }

    /// The header string sent over the wire for this entry: `"<revision> <hex id>"`.
    pub fn header(&self) -> String {
        format!("{} {}", self.revision, self.entry_id.to_hex())
    }

    /// The message as text, replacing invalid UTF-8.
    pub fn message_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }
}

/// Parse a header produced by [`LogEntry::header`].
///
/// The empty string is the header of an empty branch and parses to `None`.
pub fn parse_header(header: &str) -> LogResult<Option<(u64, ChunkId)>> {
    if header.is_empty() {
        return Ok(None);
    }
    let invalid = |reason: &str| LogError::InvalidHeader {
        header: header.to_string(),
        reason: reason.to_string(),
    };
    let (revision, id) = header
        .split_once(' ')
        .ok_or_else(|| invalid("missing separator"))?;
    let revision: u64 = revision
        .parse()
        .map_err(|_| invalid("revision is not a number"))?;
    if revision == 0 {
        return Err(invalid("revision 0 has no entry"));
    }
    let id = ChunkId::from_hex(id).map_err(|e| invalid(&e.to_string()))?;
    Ok(Some((revision, id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let id = ChunkId::from_hash([0xab; 32]);
        let entry = LogEntry::new(7, id, "tip");
        let header = entry.header();
        assert!(header.starts_with("7 abab"));
        assert_eq!(parse_header(&header).unwrap(), Some((7, id)));
    }

    #[test]
    fn empty_header_means_empty_branch() {
        assert_eq!(parse_header("").unwrap(), None);
    }

    #[test]
    fn malformed_headers_are_rejected() {
        for bad in ["7", "x abcd", "0 00", "3 zz", "3 abcd"] {
            assert!(
                matches!(parse_header(bad), Err(LogError::InvalidHeader { .. })),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn message_lossy_handles_binary() {
        let entry = LogEntry::new(1, ChunkId::null(), vec![0x66, 0xff]);
        assert_eq!(entry.message_lossy(), "f\u{fffd}");
    }
}
