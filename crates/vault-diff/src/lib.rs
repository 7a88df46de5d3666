//! Tree diffing for Chunk Vault.
//!
//! [`TreeDiffIter`] compares two directory snapshots lazily, one directory
//! level at a time, and yields [`Change`] records. Nested directories that
//! differ are queued and compared after the current level is exhausted.
//!
//! # Key Types
//!
//! - [`TreeDiffIter`] -- the lazy iterator
//! - [`Change`] / [`ChangeKind`] -- one differing path
//! - [`diff_trees`] / [`diff_commits`] -- entry points

pub mod error;
pub mod tree_diff;

pub use error::{DiffError, DiffResult};
pub use tree_diff::{diff_commits, diff_trees, Change, ChangeKind, TreeDiffIter};
