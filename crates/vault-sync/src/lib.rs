//! Push/pull synchronization for Chunk Vault.
//!
//! Two peers talk over any `AsyncRead`/`AsyncWrite` pipe using the
//! `vault-protocol` wire format. The [`Responder`] serves branches resolved
//! through a [`BranchDirectory`]; the [`Initiator`] drives [`push`] and
//! [`pull`] from the local side.
//!
//! Push sends only the chunks the remote lacks and tags the upload with the
//! remote revision it was computed against. If the remote moved in the
//! meantime the responder writes nothing and answers `PULL_REQUIRED`.
//!
//! Pull fetches the remote history into one local transaction, pruning any
//! subtree already present, then fast-forwards or merges the local branch.

pub mod access;
pub mod cancel;
pub mod directory;
pub mod error;
pub mod initiator;
pub mod pull;
pub mod push;
pub mod responder;

#[cfg(test)]
pub(crate) mod testing;

pub use access::{AccessPolicy, AccessScope, AllowAll, BranchAccess, DenyBranches, ReadOnly};
pub use cancel::CancelFlag;
pub use directory::{BranchDirectory, FileBranchDirectory, InMemoryBranchDirectory};
pub use error::{SyncError, SyncResult};
pub use initiator::Initiator;
pub use pull::{pull, PullOptions, PullOutcome, PullReport, FETCH_BATCH_SIZE};
pub use push::{collect_push_set, push, PushReport, PushStatus};
pub use responder::Responder;
