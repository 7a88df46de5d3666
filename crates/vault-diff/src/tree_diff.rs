//! Lazy, order-preserving comparison of two directory snapshots.

use std::collections::VecDeque;

use tracing::trace;
use vault_object::{empty_tree, CommitRecord, ContentPointer, DirectoryNode, TreeEntry};
use vault_store::ChunkSource;
use vault_types::ChunkId;

use crate::error::{DiffError, DiffResult};

/// How a path differs between the two sides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Present only in theirs.
    Added,
    /// Present only in ours.
    Removed,
    /// Present in both with different pointers.
    Modified,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "A"),
            Self::Removed => write!(f, "D"),
            Self::Modified => write!(f, "M"),
        }
    }
}

/// One differing path. `ours` is `None` for additions, `theirs` for removals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    pub ours: Option<TreeEntry>,
    pub theirs: Option<TreeEntry>,
}

impl Change {
    /// Returns `true` when both sides are directories.
    pub fn is_dir_on_both_sides(&self) -> bool {
        matches!((&self.ours, &self.theirs), (Some(o), Some(t)) if o.is_dir() && t.is_dir())
    }
}

/// A pair of directories still to be compared.
#[derive(Debug)]
struct PendingDir {
    prefix: String,
    ours: ChunkId,
    theirs: ChunkId,
}

/// Iterator over the changes from `ours` to `theirs`.
///
/// Each directory level is read and compared only when the iterator
/// reaches it. Within a level changes follow the node's name order; nested
/// levels follow in the order their directories were found. After the first
/// error the iterator yields nothing more.
pub struct TreeDiffIter<'s, S: ChunkSource + ?Sized> {
    source: &'s S,
    pending: VecDeque<PendingDir>,
    ready: VecDeque<Change>,
    failed: bool,
}

impl<'s, S: ChunkSource + ?Sized> TreeDiffIter<'s, S> {
    pub fn new(source: &'s S, ours: &ContentPointer, theirs: &ContentPointer) -> Self {
        let mut pending = VecDeque::new();
        if ours.id != theirs.id {
            pending.push_back(PendingDir {
                prefix: String::new(),
                ours: ours.id,
                theirs: theirs.id,
            });
        }
        Self {
            source,
            pending,
            ready: VecDeque::new(),
            failed: false,
        }
    }

    /// Compare one directory level, queueing its changes and nested levels.
    fn expand(&mut self, dir: PendingDir) -> DiffResult<()> {
        let ours = DirectoryNode::read(self.source, &dir.ours)?;
        let theirs = DirectoryNode::read(self.source, &dir.theirs)?;
        trace!(prefix = %dir.prefix, ours = ours.len(), theirs = theirs.len(), "diffing level");

        let mut left = ours.iter().peekable();
        let mut right = theirs.iter().peekable();
        loop {
            let step = match (left.peek(), right.peek()) {
                (None, None) => break,
                (Some(_), None) => Step::Left,
                (None, Some(_)) => Step::Right,
                (Some((l, _)), Some((r, _))) => match l.cmp(r) {
                    std::cmp::Ordering::Less => Step::Left,
                    std::cmp::Ordering::Greater => Step::Right,
                    std::cmp::Ordering::Equal => Step::Both,
                },
            };
            match step {
                Step::Left => {
                    if let Some((name, entry)) = left.next() {
                        self.ready.push_back(Change {
                            path: join(&dir.prefix, name),
                            kind: ChangeKind::Removed,
                            ours: Some(*entry),
                            theirs: None,
                        });
                    }
                }
                Step::Right => {
                    if let Some((name, entry)) = right.next() {
                        self.ready.push_back(Change {
                            path: join(&dir.prefix, name),
                            kind: ChangeKind::Added,
                            ours: None,
                            theirs: Some(*entry),
                        });
                    }
                }
                Step::Both => {
                    let (Some((name, o)), Some((_, t))) = (left.next(), right.next()) else {
                        break;
                    };
                    if o == t {
                        continue;
                    }
                    let path = join(&dir.prefix, name);
                    if o.is_dir() && t.is_dir() {
                        self.pending.push_back(PendingDir {
                            prefix: path.clone(),
                            ours: o.id(),
                            theirs: t.id(),
                        });
                    }
                    self.ready.push_back(Change {
                        path,
                        kind: ChangeKind::Modified,
                        ours: Some(*o),
                        theirs: Some(*t),
                    });
                }
            }
        }
        Ok(())
    }
}

enum Step {
    Left,
    Right,
    Both,
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

impl<S: ChunkSource + ?Sized> Iterator for TreeDiffIter<'_, S> {
    type Item = DiffResult<Change>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(change) = self.ready.pop_front() {
                return Some(Ok(change));
            }
            let dir = self.pending.pop_front()?;
            if let Err(e) = self.expand(dir) {
                self.failed = true;
                self.ready.clear();
                self.pending.clear();
                return Some(Err(e));
            }
        }
    }
}

impl<S: ChunkSource + ?Sized> std::iter::FusedIterator for TreeDiffIter<'_, S> {}

/// Diff two directory snapshots.
pub fn diff_trees<'s, S>(source: &'s S, ours: &ContentPointer, theirs: &ContentPointer) -> TreeDiffIter<'s, S>
where
    S: ChunkSource + ?Sized,
{
    TreeDiffIter::new(source, ours, theirs)
}

/// Diff the trees of two commits. `None` for `ours` diffs against the empty tree.
pub fn diff_commits<'s, S>(
    source: &'s S,
    ours: Option<&ChunkId>,
    theirs: &ChunkId,
) -> Result<TreeDiffIter<'s, S>, DiffError>
where
    S: ChunkSource + ?Sized,
{
    let ours_tree = match ours {
        Some(id) => CommitRecord::read(source, id)?.tree,
        None => empty_tree(),
    };
    let theirs_tree = CommitRecord::read(source, theirs)?.tree;
    Ok(TreeDiffIter::new(source, &ours_tree, &theirs_tree))
}
