//! Content-addressed chunk storage for Chunk Vault.
//!
//! A chunk is an opaque byte blob stored under the hash of its bytes. The
//! store never interprets chunk contents; commits, trees and chunk containers
//! are typed views layered on top by `vault-object`.
//!
//! # Backends
//!
//! All backends implement [`ChunkStore`]:
//!
//! - [`InMemoryChunkStore`] -- `HashMap`-based store for tests and embedding
//! - [`FileChunkStore`] -- append-only pack log with CRC-framed batches
//!
//! # Design Rules
//!
//! 1. Chunks are immutable once written; the same bytes always map to the same id.
//! 2. Writes go through a [`Transaction`] and become visible all at once on commit.
//! 3. Commits are serialized per store; reads never block on an open transaction.
//! 4. `get` on an absent id is a [`StoreError::NotFound`], never an empty buffer.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod file;
pub mod frame;
pub mod memory;
pub mod traits;
pub mod transaction;

pub use error::{StoreError, StoreResult};
pub use file::{FileChunkStore, FileStoreConfig};
pub use memory::InMemoryChunkStore;
pub use traits::{ChunkSink, ChunkSource, ChunkStore};
pub use transaction::Transaction;
