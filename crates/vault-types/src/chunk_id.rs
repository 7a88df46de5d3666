use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Width of a content hash in bytes.
pub const HASH_LEN: usize = 32;

/// Content hash identifying a chunk.
///
/// A `ChunkId` is the digest of a chunk's bytes. Identical bytes always
/// produce the same `ChunkId`, which makes chunks deduplicatable across
/// commits and branches. Equality is bitwise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId([u8; HASH_LEN]);

impl ChunkId {
    /// Wrap a pre-computed digest.
    pub const fn from_hash(hash: [u8; HASH_LEN]) -> Self {
        Self(hash)
    }

    /// Build from a byte slice that must be exactly [`HASH_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: HASH_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// The null hash (all zeros). Never produced by hashing real content.
    pub const fn null() -> Self {
        Self([0u8; HASH_LEN])
    }

    /// Returns `true` if this is the null hash.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }

    /// The raw digest.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", self.short_hex())
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; HASH_LEN]> for ChunkId {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<ChunkId> for [u8; HASH_LEN] {
    fn from(id: ChunkId) -> Self {
        id.0
    }
}
