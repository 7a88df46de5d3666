use serde::{Deserialize, Serialize};
use vault_types::ChunkId;

/// The kind of object a chunk holds, stored as the chunk's first byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Raw file data (a leaf of a chunk container).
    Data,
    /// Interior node of a chunk container.
    Container,
    /// Directory snapshot node.
    Directory,
    /// Commit record.
    Commit,
}

impl ObjectKind {
    pub const fn tag(self) -> u8 {
        match self {
            Self::Data => 0x01,
            Self::Container => 0x02,
            Self::Directory => 0x03,
            Self::Commit => 0x04,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::Container),
            0x03 => Some(Self::Directory),
            0x04 => Some(Self::Commit),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Container => write!(f, "container"),
            Self::Directory => write!(f, "directory"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// A typed reference from one object to another.
///
/// `size` is the logical size: blob length for data and containers, encoded
/// chunk length for directories and commits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentPointer {
    pub id: ChunkId,
    pub kind: ObjectKind,
    pub size: u64,
}

impl ContentPointer {
    pub fn new(id: ChunkId, kind: ObjectKind, size: u64) -> Self {
        Self { id, kind, size }
    }

    /// Returns `true` for pointers to file content (data or container).
    pub fn is_blob(&self) -> bool {
        matches!(self.kind, ObjectKind::Data | ObjectKind::Container)
    }
}

impl std::fmt::Display for ContentPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({} bytes)", self.kind, self.id.short_hex(), self.size)
    }
}
