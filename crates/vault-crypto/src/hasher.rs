use vault_types::ChunkId;

/// Domain-separated BLAKE3 content hasher.
///
/// The domain tag is fed to the hasher ahead of the data, so digests from
/// different domains never collide even for identical bytes. Chunk ids use
/// [`ContentHasher::CHUNK`]; commit signatures are computed over
/// [`ContentHasher::COMMIT_SIGNING`] digests.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for stored chunks. Every `ChunkId` in a store comes from here.
    pub const CHUNK: Self = Self {
        domain: "vault-chunk-v1",
    };
    /// Hasher for the canonical bytes a commit signature covers.
    pub const COMMIT_SIGNING: Self = Self {
        domain: "vault-commit-sig-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ChunkId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        ChunkId::from_hash(*hasher.finalize().as_bytes())
    }

    /// Verify that data produces the expected id.
    pub fn verify(&self, data: &[u8], expected: &ChunkId) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Shorthand for `ContentHasher::CHUNK.hash(data)`.
pub fn chunk_id(data: &[u8]) -> ChunkId {
    ContentHasher::CHUNK.hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash_is_deterministic() {
        let data = b"hello world";
        assert_eq!(ContentHasher::CHUNK.hash(data), ContentHasher::CHUNK.hash(data));
    }

    #[test]
    fn domains_separate_digests() {
        let data = b"same content";
        assert_ne!(
            ContentHasher::CHUNK.hash(data),
            ContentHasher::COMMIT_SIGNING.hash(data)
        );
        assert_ne!(
            ContentHasher::CHUNK.hash(data),
            ContentHasher::new("other-v1").hash(data)
        );
    }

    #[test]
    fn verify_detects_tampering() {
        let id = chunk_id(b"original");
        assert!(ContentHasher::CHUNK.verify(b"original", &id));
        assert!(!ContentHasher::CHUNK.verify(b"tampered", &id));
    }

    #[test]
    fn chunk_ids_are_never_null() {
        assert!(!chunk_id(b"").is_null());
    }

    proptest! {
        #[test]
        fn distinct_inputs_distinct_ids(a in proptest::collection::vec(any::<u8>(), 0..256),
                                        b in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assume!(a != b);
            prop_assert_ne!(chunk_id(&a), chunk_id(&b));
        }
    }
}
