//! Cryptographic primitives for Chunk Vault.
//!
//! Provides domain-separated BLAKE3 content hashing for chunks and the
//! signing/verification collaborator used for commit records. The core never
//! implements cryptography itself: signing is reached through the
//! [`CommitSigner`] and [`CommitVerifier`] traits, with an Ed25519 default.

pub mod hasher;
pub mod signer;

pub use hasher::{chunk_id, ContentHasher};
pub use signer::{
    CommitSigner, CommitVerifier, Ed25519Verifier, Signature, SignatureError, SigningKey,
    VerifyingKey,
};
