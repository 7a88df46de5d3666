//! Typed objects layered over the Chunk Vault chunk store.
//!
//! Every chunk written here starts with a one-byte [`ObjectKind`] tag
//! followed by the object's encoding. Objects reference each other through
//! [`ContentPointer`]s, so the whole history of a vault forms a Merkle DAG:
//!
//! ```text
//! CommitRecord ──tree──▶ DirectoryNode ──entry──▶ DirectoryNode ...
//!      │                      └──────entry──▶ chunk container ──▶ data chunks
//!      └──parents──▶ CommitRecord ...
//! ```
//!
//! # Modules
//!
//! - [`kind`] -- object kinds and [`ContentPointer`]
//! - [`codec`] -- tagged chunk encoding shared by every object
//! - [`chunker`] -- content-defined chunking of file data
//! - [`container`] -- chunk containers: large blobs as trees of chunks
//! - [`tree`] -- [`DirectoryNode`] snapshots
//! - [`accessor`] -- [`TreeAccessor`], copy-on-write tree editing
//! - [`commit`] -- [`CommitRecord`]

pub mod accessor;
pub mod chunker;
pub mod codec;
pub mod commit;
pub mod container;
pub mod error;
pub mod kind;
pub mod tree;

pub use accessor::TreeAccessor;
pub use chunker::{ChunkConfig, Chunker};
pub use codec::{peek_kind, read_object, write_object};
pub use commit::{CommitRecord, CommitSignature};
pub use container::{read_blob, reachable_chunks, write_blob, ContainerNode};
pub use error::{ObjectError, ObjectResult};
pub use kind::{ContentPointer, ObjectKind};
pub use tree::{empty_tree, subtree_chunks, validate_entry_name, DirectoryNode, EntryKind, TreeEntry};
