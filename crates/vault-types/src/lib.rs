//! Foundation types for Chunk Vault.
//!
//! Every other vault crate depends on `vault-types`. It carries the content
//! hash that keys the chunk store and the branch-name rules shared by the
//! branch log, the sync protocol and the command line.
//!
//! # Key Types
//!
//! - [`ChunkId`] -- 32-byte content hash identifying a stored chunk
//! - [`validate_branch_name`] -- git-style branch name validation

pub mod branch;
pub mod chunk_id;
pub mod error;

pub use branch::validate_branch_name;
pub use chunk_id::{ChunkId, HASH_LEN};
pub use error::TypeError;
