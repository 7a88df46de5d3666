use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use vault_log::BranchLog;
use vault_store::ChunkStore;

/// What a caller wants to do with a branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessScope {
    Read,
    Write,
}

impl fmt::Display for AccessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Everything needed to read or update one branch.
///
/// Clones share the same store, log and commit lock. Writers hold
/// `commit_lock` across the revision check, the chunk commit and the log
/// append so the three happen as one step.
#[derive(Clone)]
pub struct BranchAccess {
    pub name: String,
    pub store: Arc<dyn ChunkStore>,
    pub log: Arc<dyn BranchLog>,
    pub commit_lock: Arc<Mutex<()>>,
}

impl BranchAccess {
    pub fn new(name: impl Into<String>, store: Arc<dyn ChunkStore>, log: Arc<dyn BranchLog>) -> Self {
        Self {
            name: name.into(),
            store,
            log,
            commit_lock: Arc::new(Mutex::new(())),
        }
    }
}

impl fmt::Debug for BranchAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchAccess")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Decides which branches a caller may read or write.
pub trait AccessPolicy: Send + Sync {
    fn allows(&self, branch: &str, scope: AccessScope) -> bool;
}

/// Every branch, every scope.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn allows(&self, _branch: &str, _scope: AccessScope) -> bool {
        true
    }
}

/// Reads only.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOnly;

impl AccessPolicy for ReadOnly {
    fn allows(&self, _branch: &str, scope: AccessScope) -> bool {
        scope == AccessScope::Read
    }
}

/// Denies the listed branches entirely.
#[derive(Clone, Debug, Default)]
pub struct DenyBranches(HashSet<String>);

impl DenyBranches {
    pub fn new<I, S>(branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(branches.into_iter().map(Into::into).collect())
    }
}

impl AccessPolicy for DenyBranches {
    fn allows(&self, branch: &str, _scope: AccessScope) -> bool {
        !self.0.contains(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies() {
        assert!(AllowAll.allows("main", AccessScope::Write));
        assert!(ReadOnly.allows("main", AccessScope::Read));
        assert!(!ReadOnly.allows("main", AccessScope::Write));

        let deny = DenyBranches::new(["secret"]);
        assert!(!deny.allows("secret", AccessScope::Read));
        assert!(deny.allows("main", AccessScope::Write));
    }

    #[test]
    fn scope_display() {
        assert_eq!(AccessScope::Write.to_string(), "write");
    }
}
