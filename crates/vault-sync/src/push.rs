//! Sending local history to a remote branch.

use std::collections::HashSet;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};
use vault_dag::{find_chains, CommitGraph};
use vault_log::MAX_MESSAGE_LEN;
use vault_diff::diff_trees;
use vault_object::{empty_tree, reachable_chunks, subtree_chunks, CommitRecord, EntryKind};
use vault_protocol::{PutStatus, WireChunk};
use vault_store::ChunkSource;
use vault_types::ChunkId;

use crate::access::BranchAccess;
use crate::cancel::CancelFlag;
use crate::error::{SyncError, SyncResult};
use crate::initiator::Initiator;

/// How a push ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushStatus {
    /// The remote branch now points at the local head.
    Ok,
    /// The remote already pointed at the local head; nothing was sent.
    UpToDate,
    /// The remote has commits the local branch lacks. Nothing was written.
    PullRequired,
}

impl std::fmt::Display for PushStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::UpToDate => f.write_str("UP_TO_DATE"),
            Self::PullRequired => f.write_str("PULL_REQUIRED"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushReport {
    pub status: PushStatus,
    /// Remote revision after the push.
    pub revision: u64,
    pub tip: ChunkId,
    /// Chunks uploaded.
    pub chunks_sent: usize,
    /// Chunks the remote already had.
    pub chunks_skipped: usize,
    pub bytes_sent: u64,
}

impl PushReport {
    fn unsent(status: PushStatus, revision: u64, tip: ChunkId) -> Self {
        Self {
            status,
            revision,
            tip,
            chunks_sent: 0,
            chunks_skipped: 0,
            bytes_sent: 0,
        }
    }
}

/// Ordered, duplicate-free id list.
#[derive(Default)]
struct ChunkSet {
    seen: HashSet<ChunkId>,
    ids: Vec<ChunkId>,
}

impl ChunkSet {
    fn insert(&mut self, id: ChunkId) {
        if self.seen.insert(id) {
            self.ids.push(id);
        }
    }

    fn extend(&mut self, ids: impl IntoIterator<Item = ChunkId>) {
        for id in ids {
            self.insert(id);
        }
    }
}

/// Every chunk reachable from `head` but not from `remote_tip`.
///
/// Each new commit contributes itself, its root tree, and whatever its
/// diff against its first parent (the empty tree for a root commit) adds:
/// the node of a directory present on both sides, the full subtree of a new
/// directory, the container closure of a new or changed file. Removed paths
/// contribute nothing. The empty directory is never listed; every store can
/// produce it.
pub fn collect_push_set<S>(source: &S, head: &ChunkId, remote_tip: Option<&ChunkId>) -> SyncResult<Vec<ChunkId>>
where
    S: ChunkSource + ?Sized,
{
    let mut graph = CommitGraph::new(source);
    let chains = find_chains(&mut graph, head, remote_tip)?;
    let empty = empty_tree();
    let mut set = ChunkSet::default();
    set.seen.insert(empty.id);

    for commit_id in chains.ours_only() {
        let record = CommitRecord::read(source, &commit_id)?;
        set.insert(commit_id);
        set.insert(record.tree.id);
        let base = match record.first_parent() {
            Some(parent) => CommitRecord::read(source, &parent.id)?.tree,
            None => empty,
        };
        for change in diff_trees(source, &base, &record.tree) {
            let change = change?;
            let Some(entry) = change.theirs else {
                continue;
            };
            match entry.kind {
                EntryKind::Directory if change.ours.is_some_and(|o| o.is_dir()) => {
                    set.insert(entry.id());
                }
                EntryKind::Directory => set.extend(subtree_chunks(source, &entry.pointer)?),
                EntryKind::File => set.extend(reachable_chunks(source, &entry.pointer)?),
            }
        }
    }
    debug!(head = %head, chunks = set.ids.len(), "collected push set");
    Ok(set.ids)
}

/// Push the local branch head to `remote_branch`.
///
/// The upload is tagged with the remote revision read at the start. If the
/// remote tip is unknown locally or not an ancestor of the local head the
/// push stops with [`PushStatus::PullRequired`] before sending anything.
pub async fn push<R, W>(
    initiator: &mut Initiator<R, W>,
    local: &BranchAccess,
    remote_branch: &str,
    cancel: &CancelFlag,
) -> SyncResult<PushReport>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let head = local
        .log
        .head()?
        .ok_or_else(|| SyncError::EmptyBranch(local.name.clone()))?;
    let store = &*local.store;

    let remote = initiator.remote_tip(remote_branch).await?;
    let (revision, remote_tip) = match remote {
        Some((revision, tip)) => (revision, Some(tip)),
        None => (0, None),
    };
    if remote_tip == Some(head.entry_id) {
        return Ok(PushReport::unsent(PushStatus::UpToDate, revision, head.entry_id));
    }
    if let Some(tip) = &remote_tip {
        let known = store.contains(tip)?;
        if !known || !CommitGraph::new(store).is_ancestor(tip, &head.entry_id)? {
            info!(branch = remote_branch, remote = %tip, known, "remote has diverged");
            return Ok(PushReport::unsent(PushStatus::PullRequired, revision, *tip));
        }
    }

    let wanted = collect_push_set(store, &head.entry_id, remote_tip.as_ref())?;
    cancel.check()?;
    let present = initiator.has_chunks(remote_branch, &wanted).await?;

    let mut chunks = Vec::with_capacity(wanted.len() - present.len().min(wanted.len()));
    let mut bytes_sent = 0u64;
    for id in wanted.iter().filter(|id| !present.contains(id)) {
        cancel.check()?;
        let data = store.get(id)?;
        bytes_sent += data.len() as u64;
        chunks.push(WireChunk { id: *id, data });
    }
    let chunks_sent = chunks.len();
    let message = wire_message(&head.message);

    cancel.check()?;
    let (status, new_revision) = initiator
        .put_chunks(remote_branch, revision, head.entry_id, &message, chunks)
        .await?;
    let status = match status {
        PutStatus::Ok => PushStatus::Ok,
        PutStatus::PullRequired => PushStatus::PullRequired,
    };
    info!(
        branch = remote_branch,
        %status,
        revision = new_revision,
        sent = chunks_sent,
        skipped = wanted.len() - chunks_sent,
        "push finished"
    );
    Ok(PushReport {
        status,
        revision: new_revision,
        tip: head.entry_id,
        chunks_sent,
        chunks_skipped: wanted.len() - chunks_sent,
        bytes_sent,
    })
}

/// The log message as sent to the peer. Invalid UTF-8 is replaced, which
/// can grow the text, so it is cut back to fit on the wire.
fn wire_message(raw: &[u8]) -> String {
    let mut message = String::from_utf8_lossy(raw).into_owned();
    if message.len() > MAX_MESSAGE_LEN {
        let mut end = MAX_MESSAGE_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}
