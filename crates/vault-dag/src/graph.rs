//! The commit arena.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::trace;
use vault_object::{CommitRecord, ContentPointer, ObjectError};
use vault_store::{ChunkSource, StoreError};
use vault_types::ChunkId;

use crate::error::{DagError, DagResult};

/// The parts of a commit history traversal needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitNode {
    pub id: ChunkId,
    pub tree: ContentPointer,
    /// Parent ids in commit order; index 0 is the first parent.
    pub parents: Vec<ChunkId>,
}

impl CommitNode {
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Commit DAG held as an arena plus a hash index.
///
/// Nodes are decoded from the source on first use and never evicted, so a
/// graph should live no longer than one operation.
pub struct CommitGraph<'s, S: ChunkSource + ?Sized> {
    source: &'s S,
    nodes: Vec<CommitNode>,
    index: HashMap<ChunkId, usize>,
}

impl<'s, S: ChunkSource + ?Sized> CommitGraph<'s, S> {
    pub fn new(source: &'s S) -> Self {
        Self {
            source,
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// The chunk source commits are loaded from.
    pub fn source(&self) -> &'s S {
        self.source
    }

    /// Number of commits loaded so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn slot(&mut self, id: &ChunkId) -> DagResult<usize> {
        if let Some(&slot) = self.index.get(id) {
            return Ok(slot);
        }
        let record = CommitRecord::read(self.source, id).map_err(|e| match e {
            ObjectError::Store(StoreError::NotFound(missing)) => DagError::MissingCommit(missing),
            other => DagError::Object(other),
        })?;
        let slot = self.nodes.len();
        self.nodes.push(CommitNode {
            id: *id,
            tree: record.tree,
            parents: record.parent_ids(),
        });
        self.index.insert(*id, slot);
        trace!(id = %id, slot, "loaded commit");
        Ok(slot)
    }

    /// The node for `id`, loading it if needed.
    pub fn node(&mut self, id: &ChunkId) -> DagResult<&CommitNode> {
        let slot = self.slot(id)?;
        Ok(&self.nodes[slot])
    }

    /// Parent ids of `id`, first parent first.
    pub fn parents(&mut self, id: &ChunkId) -> DagResult<Vec<ChunkId>> {
        Ok(self.node(id)?.parents.clone())
    }

    /// Every commit reachable from `tip`, `tip` included.
    pub fn ancestors(&mut self, tip: &ChunkId) -> DagResult<HashSet<ChunkId>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([*tip]);
        seen.insert(*tip);
        while let Some(id) = queue.pop_front() {
            for parent in self.parents(&id)? {
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(seen)
    }

    /// Returns `true` if `ancestor` is reachable from `descendant`. A commit
    /// is its own ancestor.
    pub fn is_ancestor(&mut self, ancestor: &ChunkId, descendant: &ChunkId) -> DagResult<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([*descendant]);
        while let Some(id) = queue.pop_front() {
            for parent in self.parents(&id)? {
                if parent == *ancestor {
                    return Ok(true);
                }
                if seen.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(false)
    }
}

impl<S: ChunkSource + ?Sized> std::fmt::Debug for CommitGraph<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitGraph")
            .field("loaded", &self.nodes.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::commit;
    use super::*;
    use vault_store::InMemoryChunkStore;

    #[test]
    fn loads_lazily() {
        let store = InMemoryChunkStore::new();
        let a = commit(&store, "a", &[]);
        let b = commit(&store, "b", &[a]);
        let mut graph = CommitGraph::new(&store);
        assert!(graph.is_empty());
        assert_eq!(graph.parents(&b).unwrap(), vec![a]);
        assert_eq!(graph.len(), 1);
        assert!(graph.node(&a).unwrap().is_root());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn ancestry_queries() {
        let store = InMemoryChunkStore::new();
        let a = commit(&store, "a", &[]);
        let b = commit(&store, "b", &[a]);
        let c = commit(&store, "c", &[b]);
        let d = commit(&store, "d", &[b]);
        let mut graph = CommitGraph::new(&store);

        assert!(graph.is_ancestor(&a, &c).unwrap());
        assert!(graph.is_ancestor(&c, &c).unwrap());
        assert!(!graph.is_ancestor(&c, &a).unwrap());
        assert!(!graph.is_ancestor(&d, &c).unwrap());
        assert_eq!(graph.ancestors(&d).unwrap(), HashSet::from([a, b, d]));
    }

    #[test]
    fn missing_parent_is_reported() {
        let store = InMemoryChunkStore::new();
        let ghost = ChunkId::from_hash([9; 32]);
        let orphan = commit(&store, "orphan", &[ghost]);
        let mut graph = CommitGraph::new(&store);
        assert!(matches!(
            graph.ancestors(&orphan),
            Err(DagError::MissingCommit(id)) if id == ghost
        ));
    }
}
