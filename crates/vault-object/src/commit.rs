use serde::{Deserialize, Serialize};
use tracing::debug;
use vault_crypto::{CommitSigner, CommitVerifier, Signature, VerifyingKey};
use vault_store::{ChunkSink, ChunkSource};
use vault_types::ChunkId;

use crate::codec::{read_object, split_tag, write_object};
use crate::error::{ObjectError, ObjectResult};
use crate::kind::{ContentPointer, ObjectKind};

/// Signature over a commit's canonical bytes, with the signer's public key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSignature {
    pub public_key: [u8; 32],
    pub signature: Signature,
}

/// An immutable commit: a tree snapshot plus its place in history.
///
/// Zero parents make a root commit, two or more a merge. The commit's own
/// pointer is the hash of its encoded form, signature included.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub tree: ContentPointer,
    pub parents: Vec<ContentPointer>,
    pub message: Vec<u8>,
    pub signature: Option<CommitSignature>,
}

/// The signed portion of a commit.
#[derive(Serialize)]
struct Canonical<'a> {
    tree: &'a ContentPointer,
    parents: &'a [ContentPointer],
    message: &'a [u8],
}

impl CommitRecord {
    pub fn new(tree: ContentPointer, parents: Vec<ContentPointer>, message: impl Into<Vec<u8>>) -> Self {
        Self {
            tree,
            parents,
            message: message.into(),
            signature: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn first_parent(&self) -> Option<&ContentPointer> {
        self.parents.first()
    }

    pub fn parent_ids(&self) -> Vec<ChunkId> {
        self.parents.iter().map(|p| p.id).collect()
    }

    pub fn message_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }

    /// Bytes covered by the signature: everything but the signature itself.
    pub fn canonical_bytes(&self) -> ObjectResult<Vec<u8>> {
        let canonical = Canonical {
            tree: &self.tree,
            parents: &self.parents,
            message: &self.message,
        };
        bincode::serialize(&canonical).map_err(|e| ObjectError::Codec(e.to_string()))
    }

    /// Sign the commit, replacing any previous signature.
    pub fn sign(&mut self, signer: &dyn CommitSigner) -> ObjectResult<()> {
        let signature = signer.sign_commit(&self.canonical_bytes()?)?;
        self.signature = Some(CommitSignature {
            public_key: signer.public_key().as_bytes(),
            signature,
        });
        Ok(())
    }

    /// Check the signature. An unsigned commit verifies as `false`.
    pub fn verify(&self, verifier: &dyn CommitVerifier) -> ObjectResult<bool> {
        let Some(sig) = &self.signature else {
            return Ok(false);
        };
        let key = VerifyingKey::from_bytes(sig.public_key)?;
        Ok(verifier.verify_commit(&self.canonical_bytes()?, &sig.signature, &key)?)
    }

    pub fn write<K: ChunkSink + ?Sized>(&self, sink: &mut K) -> ObjectResult<ContentPointer> {
        let ptr = write_object(sink, ObjectKind::Commit, self)?;
        debug!(id = %ptr.id, parents = self.parents.len(), "wrote commit");
        Ok(ptr)
    }

    pub fn read<S: ChunkSource + ?Sized>(source: &S, id: &ChunkId) -> ObjectResult<Self> {
        read_object(source, id, ObjectKind::Commit)
    }

    /// Pointer to the stored commit `id`, for use as a parent link.
    pub fn pointer<S: ChunkSource + ?Sized>(source: &S, id: &ChunkId) -> ObjectResult<ContentPointer> {
        let chunk = source.get(id)?;
        let (kind, _) = split_tag(id, &chunk)?;
        if kind != ObjectKind::Commit {
            return Err(ObjectError::UnexpectedKind {
                id: *id,
                expected: ObjectKind::Commit,
                actual: kind,
            });
        }
        Ok(ContentPointer::new(*id, kind, chunk.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::empty_tree;
    use vault_crypto::{Ed25519Verifier, SigningKey};
    use vault_store::{InMemoryChunkStore, Transaction};

    #[test]
    fn write_and_read_commit() {
        let store = InMemoryChunkStore::new();
        let mut tx = Transaction::begin(&store);
        let root = CommitRecord::new(empty_tree(), Vec::new(), "root");
        let root_ptr = root.write(&mut tx).unwrap();
        let child = CommitRecord::new(empty_tree(), vec![root_ptr], "child");
        let child_ptr = child.write(&mut tx).unwrap();
        tx.commit().unwrap();

        assert_eq!(root_ptr.kind, ObjectKind::Commit);
        let back = CommitRecord::read(&store, &child_ptr.id).unwrap();
        assert_eq!(back, child);
        assert_eq!(back.parent_ids(), vec![root_ptr.id]);
        assert!(root.is_root());
        assert!(!back.is_root() && !back.is_merge());
        assert_eq!(back.message_lossy(), "child");
        assert_eq!(CommitRecord::pointer(&store, &root_ptr.id).unwrap(), root_ptr);
        assert!(matches!(
            CommitRecord::pointer(&store, &empty_tree().id),
            Err(ObjectError::Store(_))
        ));
    }

    #[test]
    fn commits_with_different_parents_differ() {
        let a = CommitRecord::new(empty_tree(), Vec::new(), "m");
        let store = InMemoryChunkStore::new();
        let mut tx = Transaction::begin(&store);
        let a_ptr = a.write(&mut tx).unwrap();
        let b_ptr = CommitRecord::new(empty_tree(), vec![a_ptr], "m")
            .write(&mut tx)
            .unwrap();
        assert_ne!(a_ptr.id, b_ptr.id);
    }

    #[test]
    fn signed_commit_verifies() {
        let key = SigningKey::generate();
        let mut commit = CommitRecord::new(empty_tree(), Vec::new(), "signed");
        assert!(!commit.verify(&Ed25519Verifier).unwrap());

        commit.sign(&key).unwrap();
        assert!(commit.verify(&Ed25519Verifier).unwrap());
        assert_eq!(
            commit.signature.as_ref().unwrap().public_key,
            key.verifying_key().as_bytes()
        );
    }

    #[test]
    fn tampered_commit_fails_verification() {
        let key = SigningKey::generate();
        let mut commit = CommitRecord::new(empty_tree(), Vec::new(), "original");
        commit.sign(&key).unwrap();
        commit.message = b"tampered".to_vec();
        assert!(!commit.verify(&Ed25519Verifier).unwrap());
    }

    #[test]
    fn signature_survives_storage() {
        let store = InMemoryChunkStore::new();
        let key = SigningKey::from_bytes([9; 32]);
        let mut commit = CommitRecord::new(empty_tree(), Vec::new(), "stored");
        commit.sign(&key).unwrap();

        let mut tx = Transaction::begin(&store);
        let ptr = commit.write(&mut tx).unwrap();
        tx.commit().unwrap();
        let back = CommitRecord::read(&store, &ptr.id).unwrap();
        assert!(back.verify(&Ed25519Verifier).unwrap());
    }
}
