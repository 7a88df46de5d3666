//! Three-way merge for Chunk Vault.
//!
//! [`merge_trees`] combines the changes two sides made since a common
//! parent tree. Paths changed on one side only take that side's version;
//! files changed differently on both sides are handed to a [`Resolver`].
//! [`merge_commits`] wraps this with merge-base lookup and writes the merge
//! commit.

pub mod conflict;
pub mod error;
pub mod merge;

pub use conflict::{ours_wins, theirs_wins, Conflict, Resolver};
pub use error::{MergeError, MergeResult};
pub use merge::{merge_commits, merge_trees, MergeOutcome};
