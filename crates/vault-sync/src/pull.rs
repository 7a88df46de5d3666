//! Fetching remote history and folding it into the local branch.

use std::collections::{HashSet, VecDeque};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};
use vault_crypto::CommitSigner;
use vault_merge::{merge_commits, ours_wins, MergeOutcome, Resolver};
use vault_object::{
    empty_tree, CommitRecord, ContainerNode, ContentPointer, DirectoryNode, EntryKind, ObjectKind,
};
use vault_store::{ChunkSource, ChunkStore, Transaction};
use vault_types::ChunkId;

use crate::access::BranchAccess;
use crate::cancel::CancelFlag;
use crate::error::SyncResult;
use crate::initiator::Initiator;

/// Chunks requested per `GET_CHUNKS` round trip.
pub const FETCH_BATCH_SIZE: usize = 256;

/// How the local branch changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullOutcome {
    /// The remote tip was already the local head, or the remote is empty.
    UpToDate,
    /// The local head moved forward to the remote tip.
    FastForward(ChunkId),
    /// A merge commit joining both tips became the local head.
    Merged(ChunkId),
    /// The remote tip is already part of local history.
    LocalAhead,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullReport {
    pub outcome: PullOutcome,
    pub chunks_fetched: usize,
    pub bytes_fetched: u64,
}

/// Settings for [`pull`].
pub struct PullOptions<'a> {
    /// Picks the entry for paths both sides changed.
    pub resolver: Resolver<'a>,
    /// Signs the merge commit, if one is written.
    pub signer: Option<&'a dyn CommitSigner>,
    /// Message of the merge commit and of the local log entry.
    pub message: String,
}

impl Default for PullOptions<'_> {
    fn default() -> Self {
        Self {
            resolver: &ours_wins,
            signer: None,
            message: "pull".to_string(),
        }
    }
}

/// A chunk still to fetch, and how to read it once it arrives.
#[derive(Clone, Copy, Debug)]
enum Want {
    Commit(ChunkId),
    Directory(ChunkId),
    Blob(ContentPointer),
}

impl Want {
    fn id(&self) -> ChunkId {
        match self {
            Self::Commit(id) | Self::Directory(id) => *id,
            Self::Blob(ptr) => ptr.id,
        }
    }

    /// Queue the children of a chunk that just arrived.
    fn expand<S: ChunkSource + ?Sized>(&self, source: &S, queue: &mut VecDeque<Want>) -> SyncResult<()> {
        match self {
            Self::Commit(id) => {
                let record = CommitRecord::read(source, id)?;
                queue.push_back(Self::Directory(record.tree.id));
                queue.extend(record.parents.iter().map(|p| Self::Commit(p.id)));
            }
            Self::Directory(id) => {
                let node = DirectoryNode::read(source, id)?;
                for (_, entry) in &node {
                    queue.push_back(match entry.kind {
                        EntryKind::Directory => Self::Directory(entry.id()),
                        EntryKind::File => Self::Blob(entry.pointer),
                    });
                }
            }
            Self::Blob(ptr) if ptr.kind == ObjectKind::Container => {
                let node = ContainerNode::read(source, &ptr.id)?;
                queue.extend(node.children.into_iter().map(Self::Blob));
            }
            Self::Blob(_) => {}
        }
        Ok(())
    }
}

#[derive(Default)]
struct FetchStats {
    chunks: usize,
    bytes: u64,
}

/// Fetch everything reachable from `tip` that the local store lacks.
///
/// A chunk already in the store is taken to have its whole closure there
/// too, so its subtree is not walked. Fetched chunks are staged in one
/// transaction and committed together at the end.
async fn fetch_history<R, W>(
    initiator: &mut Initiator<R, W>,
    store: &dyn ChunkStore,
    branch: &str,
    tip: &ChunkId,
    cancel: &CancelFlag,
) -> SyncResult<FetchStats>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let empty = empty_tree().id;
    let mut tx = Transaction::begin(store);
    let mut queue = VecDeque::from([Want::Commit(*tip)]);
    let mut requested = HashSet::new();
    let mut stats = FetchStats::default();

    while !queue.is_empty() {
        cancel.check()?;
        let mut batch = Vec::new();
        while batch.len() < FETCH_BATCH_SIZE {
            let Some(want) = queue.pop_front() else {
                break;
            };
            let id = want.id();
            if id == empty || !requested.insert(id) || tx.contains(&id)? {
                continue;
            }
            batch.push(want);
        }
        if batch.is_empty() {
            continue;
        }

        let ids: Vec<ChunkId> = batch.iter().map(Want::id).collect();
        let chunks = initiator.get_chunks(branch, &ids).await?;
        for (want, chunk) in batch.iter().zip(chunks) {
            cancel.check()?;
            stats.chunks += 1;
            stats.bytes += chunk.data.len() as u64;
            tx.put_chunk(chunk.id, chunk.data)?;
            want.expand(&tx, &mut queue)?;
        }
        debug!(fetched = stats.chunks, queued = queue.len(), "fetched batch");
    }

    tx.commit()?;
    Ok(stats)
}

/// Pull `remote_branch` into the local branch.
///
/// After the fetch the local commit lock is held while the head is re-read
/// and the new entry appended, so a concurrent local commit cannot be lost.
pub async fn pull<R, W>(
    initiator: &mut Initiator<R, W>,
    local: &BranchAccess,
    remote_branch: &str,
    options: &PullOptions<'_>,
    cancel: &CancelFlag,
) -> SyncResult<PullReport>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let unchanged = |outcome| PullReport {
        outcome,
        chunks_fetched: 0,
        bytes_fetched: 0,
    };
    let Some((remote_revision, remote_tip)) = initiator.remote_tip(remote_branch).await? else {
        return Ok(unchanged(PullOutcome::UpToDate));
    };
    if local.log.head()?.map(|e| e.entry_id) == Some(remote_tip) {
        return Ok(unchanged(PullOutcome::UpToDate));
    }

    let store = &*local.store;
    let stats = fetch_history(initiator, store, remote_branch, &remote_tip, cancel).await?;

    let _guard = local.commit_lock.lock().await;
    let head = local.log.head()?;
    let expected = head.as_ref().map_or(0, |e| e.revision);
    let message = options.message.clone().into_bytes();
    let outcome = match head.map(|e| e.entry_id) {
        None => {
            local.log.compare_and_append(expected, remote_tip, message)?;
            PullOutcome::FastForward(remote_tip)
        }
        Some(ours) if ours == remote_tip => PullOutcome::UpToDate,
        Some(ours) => {
            let mut tx = Transaction::begin(store);
            match merge_commits(
                &mut tx,
                &ours,
                &remote_tip,
                options.message.as_str(),
                options.resolver,
                options.signer,
            )? {
                MergeOutcome::UpToDate => PullOutcome::LocalAhead,
                MergeOutcome::FastForward(id) => {
                    local.log.compare_and_append(expected, id, message)?;
                    PullOutcome::FastForward(id)
                }
                MergeOutcome::Merged(ptr) => {
                    tx.commit()?;
                    local.log.compare_and_append(expected, ptr.id, message)?;
                    PullOutcome::Merged(ptr.id)
                }
            }
        }
    };

    info!(
        branch = %local.name,
        remote = remote_branch,
        remote_revision,
        ?outcome,
        fetched = stats.chunks,
        "pull finished"
    );
    Ok(PullReport {
        outcome,
        chunks_fetched: stats.chunks,
        bytes_fetched: stats.bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::directory::InMemoryBranchDirectory;
    use crate::error::SyncError;
    use crate::push::{push, PushStatus};
    use crate::testing::{commit_files, connect, read_head_file};
    use vault_merge::theirs_wins;

    #[tokio::test]
    async fn pull_into_empty_branch_fast_forwards() {
        let remote = Arc::new(InMemoryBranchDirectory::new());
        let remote_main = remote.branch("main").unwrap();
        commit_files(&remote_main, &[("a", "1"), ("d/e/f", "deep")], "c1");
        let c2 = commit_files(&remote_main, &[("a", "2")], "c2");

        let local = InMemoryBranchDirectory::new();
        let main = local.branch("main").unwrap();
        let (mut initiator, _server) = connect(remote.clone());
        let report = pull(&mut initiator, &main, "main", &PullOptions::default(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, PullOutcome::FastForward(c2));
        assert_eq!(local.store().len(), remote.store().len());
        assert_eq!(read_head_file(&main, "d/e/f").as_deref(), Some("deep"));
        assert_eq!(read_head_file(&main, "a").as_deref(), Some("2"));

        let again = pull(&mut initiator, &main, "main", &PullOptions::default(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(again.outcome, PullOutcome::UpToDate);
    }

    #[tokio::test]
    async fn pull_fetches_only_missing_subtrees() {
        let remote = Arc::new(InMemoryBranchDirectory::new());
        let remote_main = remote.branch("main").unwrap();
        commit_files(&remote_main, &[("big/x", "x"), ("big/y", "y"), ("small", "s")], "c1");

        let local = InMemoryBranchDirectory::new();
        let main = local.branch("main").unwrap();
        let (mut initiator, _server) = connect(remote.clone());
        pull(&mut initiator, &main, "main", &PullOptions::default(), &CancelFlag::new())
            .await
            .unwrap();

        commit_files(&remote_main, &[("small", "s2")], "c2");
        let report = pull(&mut initiator, &main, "main", &PullOptions::default(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(matches!(report.outcome, PullOutcome::FastForward(_)));
        // Commit, root tree and the changed blob; "big" is already local.
        assert_eq!(report.chunks_fetched, 3);
    }

    #[tokio::test]
    async fn divergent_pull_merges_then_push_succeeds() {
        let remote = Arc::new(InMemoryBranchDirectory::new());
        let remote_main = remote.branch("main").unwrap();
        commit_files(&remote_main, &[("shared", "base"), ("mine", "0"), ("theirs", "0")], "base");

        let local = InMemoryBranchDirectory::new();
        let main = local.branch("main").unwrap();
        let (mut initiator, _server) = connect(remote.clone());
        pull(&mut initiator, &main, "main", &PullOptions::default(), &CancelFlag::new())
            .await
            .unwrap();

        let ours = commit_files(&main, &[("mine", "local edit"), ("shared", "ours")], "local");
        let theirs = commit_files(&remote_main, &[("theirs", "remote edit"), ("shared", "theirs")], "remote");

        let push_report = push(&mut initiator, &main, "main", &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(push_report.status, PushStatus::PullRequired);

        let options = PullOptions {
            resolver: &theirs_wins,
            message: "merge remote".into(),
            ..PullOptions::default()
        };
        let report = pull(&mut initiator, &main, "main", &options, &CancelFlag::new())
            .await
            .unwrap();
        let PullOutcome::Merged(merge) = report.outcome else {
            panic!("expected a merge, got {:?}", report.outcome);
        };
        let record = CommitRecord::read(&*main.store, &merge).unwrap();
        assert_eq!(record.parent_ids(), vec![ours, theirs]);
        assert_eq!(read_head_file(&main, "mine").as_deref(), Some("local edit"));
        assert_eq!(read_head_file(&main, "theirs").as_deref(), Some("remote edit"));
        assert_eq!(read_head_file(&main, "shared").as_deref(), Some("theirs"));

        let push_report = push(&mut initiator, &main, "main", &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(push_report.status, PushStatus::Ok);
        assert_eq!(push_report.revision, 3);
        assert_eq!(remote_main.log.head().unwrap().unwrap().entry_id, merge);
    }

    #[tokio::test]
    async fn remote_behind_local_is_local_ahead() {
        let remote = Arc::new(InMemoryBranchDirectory::new());
        let local = InMemoryBranchDirectory::new();
        let main = local.branch("main").unwrap();
        commit_files(&main, &[("a", "1")], "c1");

        let (mut initiator, _server) = connect(remote.clone());
        push(&mut initiator, &main, "main", &CancelFlag::new())
            .await
            .unwrap();
        commit_files(&main, &[("a", "2")], "c2");

        let report = pull(&mut initiator, &main, "main", &PullOptions::default(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, PullOutcome::LocalAhead);
        assert_eq!(main.log.revision().unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_remote_is_up_to_date() {
        let local = InMemoryBranchDirectory::new();
        let main = local.branch("main").unwrap();
        let (mut initiator, _server) = connect(Arc::new(InMemoryBranchDirectory::new()));
        let report = pull(&mut initiator, &main, "main", &PullOptions::default(), &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.outcome, PullOutcome::UpToDate);
    }

    #[tokio::test]
    async fn cancelled_pull_commits_nothing() {
        let remote = Arc::new(InMemoryBranchDirectory::new());
        let remote_main = remote.branch("main").unwrap();
        commit_files(&remote_main, &[("a", "1")], "c1");

        let local = InMemoryBranchDirectory::new();
        let main = local.branch("main").unwrap();
        let (mut initiator, _server) = connect(remote.clone());
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            pull(&mut initiator, &main, "main", &PullOptions::default(), &cancel).await,
            Err(SyncError::Cancelled)
        ));
        assert!(local.store().is_empty());
        assert_eq!(main.log.revision().unwrap(), 0);
    }
}
