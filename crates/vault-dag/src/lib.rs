//! Commit history traversal for Chunk Vault.
//!
//! [`CommitGraph`] is an arena of commit nodes indexed by content hash,
//! filled lazily from a chunk source. [`find_chains`] walks two tips back to
//! the history they share and reports each tip's linear chains of commits;
//! merge uses it to find a merge base and push uses it to find the commits
//! a peer has not seen.
//!
//! # Invariants
//!
//! - History is acyclic: a commit's id covers its parents' ids.
//! - Every chain is ordered newest to oldest and includes its terminal commit.
//! - Each commit appears in at most one chain per side, except as a
//!   [`ChainEnd::Joined`] terminal.

pub mod chains;
pub mod error;
pub mod graph;

pub use chains::{find_chains, AncestorChain, AncestorChains, ChainEnd};
pub use error::{DagError, DagResult};
pub use graph::{CommitGraph, CommitNode};
