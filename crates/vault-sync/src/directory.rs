//! Branch resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};
use vault_log::{FileBranchLog, InMemoryBranchLog};
use vault_store::{FileChunkStore, FileStoreConfig, InMemoryChunkStore, StoreError};
use vault_types::validate_branch_name;

use crate::access::{AccessPolicy, AccessScope, AllowAll, BranchAccess};
use crate::error::{SyncError, SyncResult};

/// Directory under a repository root holding the chunk pack.
pub const CHUNKS_DIR: &str = "chunks";
/// Directory under a repository root holding one log file per branch.
pub const BRANCHES_DIR: &str = "branches";
const LOG_EXTENSION: &str = "log";

/// Resolves a branch name and scope to a [`BranchAccess`].
///
/// Unknown branches resolve to an empty branch at revision 0, so the first
/// push creates them.
#[async_trait]
pub trait BranchDirectory: Send + Sync {
    async fn open(&self, branch: &str, scope: AccessScope) -> SyncResult<BranchAccess>;
}

fn check_access(policy: &dyn AccessPolicy, branch: &str, scope: AccessScope) -> SyncResult<()> {
    validate_branch_name(branch)?;
    if !policy.allows(branch, scope) {
        return Err(SyncError::AccessDenied(format!("{scope} access to branch {branch:?}")));
    }
    Ok(())
}

/// Branches sharing one in-memory chunk store.
pub struct InMemoryBranchDirectory {
    store: Arc<InMemoryChunkStore>,
    branches: Mutex<HashMap<String, BranchAccess>>,
    policy: Arc<dyn AccessPolicy>,
}

impl InMemoryBranchDirectory {
    pub fn new() -> Self {
        Self::with_policy(Arc::new(AllowAll))
    }

    pub fn with_policy(policy: Arc<dyn AccessPolicy>) -> Self {
        Self {
            store: Arc::new(InMemoryChunkStore::new()),
            branches: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn store(&self) -> &Arc<InMemoryChunkStore> {
        &self.store
    }

    /// Open a branch without a policy check, for local use.
    pub fn branch(&self, branch: &str) -> SyncResult<BranchAccess> {
        validate_branch_name(branch)?;
        let mut branches = self.branches.lock().map_err(|_| StoreError::Poisoned)?;
        let access = branches.entry(branch.to_string()).or_insert_with(|| {
            debug!(branch, "created in-memory branch");
            BranchAccess::new(branch, self.store.clone(), Arc::new(InMemoryBranchLog::new()))
        });
        Ok(access.clone())
    }
}

impl Default for InMemoryBranchDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BranchDirectory for InMemoryBranchDirectory {
    async fn open(&self, branch: &str, scope: AccessScope) -> SyncResult<BranchAccess> {
        check_access(self.policy.as_ref(), branch, scope)?;
        self.branch(branch)
    }
}

/// A repository on disk: one chunk pack shared by every branch, and one
/// log file per branch.
///
/// ```text
/// <root>/chunks/chunks.pack
/// <root>/branches/<branch>.log
/// ```
pub struct FileBranchDirectory {
    root: PathBuf,
    store: Arc<FileChunkStore>,
    sync_on_append: bool,
    branches: Mutex<HashMap<String, BranchAccess>>,
    policy: Arc<dyn AccessPolicy>,
}

impl FileBranchDirectory {
    /// Open the repository at `root`, creating its directories if needed.
    pub fn open(root: &Path, config: FileStoreConfig) -> SyncResult<Self> {
        std::fs::create_dir_all(root.join(BRANCHES_DIR)).map_err(StoreError::Io)?;
        let sync_on_append = config.sync_on_commit;
        let store = FileChunkStore::open(&root.join(CHUNKS_DIR), config)?;
        info!(root = %root.display(), chunks = store.len(), "opened repository");
        Ok(Self {
            root: root.to_path_buf(),
            store: Arc::new(store),
            sync_on_append,
            branches: Mutex::new(HashMap::new()),
            policy: Arc::new(AllowAll),
        })
    }

    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Arc<FileChunkStore> {
        &self.store
    }

    fn log_path(&self, branch: &str) -> PathBuf {
        self.root
            .join(BRANCHES_DIR)
            .join(format!("{branch}.{LOG_EXTENSION}"))
    }

    /// Open a branch without a policy check, for local use.
    pub fn branch(&self, branch: &str) -> SyncResult<BranchAccess> {
        validate_branch_name(branch)?;
        let mut branches = self.branches.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(access) = branches.get(branch) {
            return Ok(access.clone());
        }
        let path = self.log_path(branch);
        let log = FileBranchLog::open(&path, self.sync_on_append)?;
        let access = BranchAccess::new(branch, self.store.clone(), Arc::new(log));
        branches.insert(branch.to_string(), access.clone());
        debug!(branch, path = %path.display(), "opened branch log");
        Ok(access)
    }

    /// Names of the branches that have a log file, sorted.
    pub fn branch_names(&self) -> SyncResult<Vec<String>> {
        let base = self.root.join(BRANCHES_DIR);
        let mut names = Vec::new();
        let mut dirs = vec![base.clone()];
        while let Some(dir) = dirs.pop() {
            for entry in std::fs::read_dir(&dir).map_err(StoreError::Io)? {
                let path = entry.map_err(StoreError::Io)?.path();
                if path.is_dir() {
                    dirs.push(path);
                } else if path.extension().is_some_and(|e| e == LOG_EXTENSION) {
                    let Ok(relative) = path.with_extension("").strip_prefix(&base).map(Path::to_path_buf) else {
                        continue;
                    };
                    let name = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    names.push(name);
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl BranchDirectory for FileBranchDirectory {
    async fn open(&self, branch: &str, scope: AccessScope) -> SyncResult<BranchAccess> {
        check_access(self.policy.as_ref(), branch, scope)?;
        self.branch(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::DenyBranches;
    use vault_crypto::chunk_id;

    #[tokio::test]
    async fn in_memory_branches_share_store_and_log() {
        let dir = InMemoryBranchDirectory::new();
        let a = dir.open("main", AccessScope::Write).await.unwrap();
        let b = dir.open("main", AccessScope::Read).await.unwrap();
        a.log.append(chunk_id(b"c1"), b"first".to_vec()).unwrap();
        assert_eq!(b.log.revision().unwrap(), 1);
        assert!(Arc::ptr_eq(&a.commit_lock, &b.commit_lock));

        let other = dir.open("dev", AccessScope::Read).await.unwrap();
        assert_eq!(other.log.revision().unwrap(), 0);
    }

    #[tokio::test]
    async fn policy_and_names_are_checked() {
        let dir = InMemoryBranchDirectory::with_policy(Arc::new(DenyBranches::new(["private"])));
        assert!(matches!(
            dir.open("private", AccessScope::Read).await,
            Err(SyncError::AccessDenied(_))
        ));
        assert!(matches!(
            dir.open("../escape", AccessScope::Read).await,
            Err(SyncError::InvalidBranch(_))
        ));
    }

    #[tokio::test]
    async fn file_directory_persists_logs() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let dir = FileBranchDirectory::open(tmp.path(), FileStoreConfig::default()).unwrap();
            let access = dir.open("team/main", AccessScope::Write).await.unwrap();
            access.log.append(chunk_id(b"c1"), b"m".to_vec()).unwrap();
            dir.branch("dev").unwrap();
        }
        let dir = FileBranchDirectory::open(tmp.path(), FileStoreConfig::default()).unwrap();
        assert_eq!(dir.branch_names().unwrap(), vec!["dev", "team/main"]);
        let access = dir.branch("team/main").unwrap();
        assert_eq!(access.log.head().unwrap().unwrap().entry_id, chunk_id(b"c1"));
    }
}
