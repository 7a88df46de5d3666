//! Ancestor chain finding.

use std::collections::{HashSet, VecDeque};

use tracing::debug;
use vault_store::ChunkSource;
use vault_types::ChunkId;

use crate::error::DagResult;
use crate::graph::CommitGraph;

/// Why a chain stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainEnd {
    /// The last commit is an ancestor of the other tip.
    CommonAncestor(ChunkId),
    /// The last commit has no parents.
    Root,
    /// The last commit was already walked by an earlier chain on this side.
    Joined(ChunkId),
}

/// A linear run of commits from one start back to its terminal, newest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AncestorChain {
    /// Commits newest to oldest, terminal included.
    pub commits: Vec<ChunkId>,
    pub end: ChainEnd,
}

impl AncestorChain {
    /// Commits only this chain contributes: all of them for a root-ended
    /// chain, all but the shared terminal otherwise.
    pub fn unique_commits(&self) -> &[ChunkId] {
        match self.end {
            ChainEnd::Root => &self.commits,
            ChainEnd::CommonAncestor(_) | ChainEnd::Joined(_) => {
                &self.commits[..self.commits.len().saturating_sub(1)]
            }
        }
    }
}

/// The chains of both tips.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AncestorChains {
    pub ours: Vec<AncestorChain>,
    pub theirs: Vec<AncestorChain>,
}

impl AncestorChains {
    /// Commits reachable from our tip but not from theirs, newest first per chain.
    pub fn ours_only(&self) -> Vec<ChunkId> {
        self.ours
            .iter()
            .flat_map(|c| c.unique_commits().iter().copied())
            .collect()
    }

    /// Commits reachable from their tip but not from ours.
    pub fn theirs_only(&self) -> Vec<ChunkId> {
        self.theirs
            .iter()
            .flat_map(|c| c.unique_commits().iter().copied())
            .collect()
    }

    /// Every distinct common-ancestor terminal, in chain order.
    pub fn common_ancestors(&self) -> Vec<ChunkId> {
        let mut seen = HashSet::new();
        self.ours
            .iter()
            .chain(self.theirs.iter())
            .filter_map(|c| match c.end {
                ChainEnd::CommonAncestor(id) if seen.insert(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// The lowest common ancestor: a common terminal that is not an ancestor
    /// of another one. `None` when the histories share nothing.
    ///
    /// Criss-cross histories can have several; the first in chain order wins.
    pub fn merge_base<S>(&self, graph: &mut CommitGraph<'_, S>) -> DagResult<Option<ChunkId>>
    where
        S: ChunkSource + ?Sized,
    {
        let candidates = self.common_ancestors();
        for candidate in &candidates {
            let mut lowest = true;
            for other in &candidates {
                if other != candidate && graph.is_ancestor(candidate, other)? {
                    lowest = false;
                    break;
                }
            }
            if lowest {
                return Ok(Some(*candidate));
            }
        }
        Ok(None)
    }
}

/// Walk `tip` back until every chain reaches a commit in `stop_at`, a root,
/// or a commit an earlier chain already walked.
fn walk<S>(graph: &mut CommitGraph<'_, S>, tip: ChunkId, stop_at: &HashSet<ChunkId>) -> DagResult<Vec<AncestorChain>>
where
    S: ChunkSource + ?Sized,
{
    let mut walked = HashSet::new();
    let mut starts = VecDeque::from([tip]);
    let mut chains = Vec::new();

    while let Some(start) = starts.pop_front() {
        let mut commits = Vec::new();
        let mut current = start;
        let end = loop {
            commits.push(current);
            if !walked.insert(current) {
                break ChainEnd::Joined(current);
            }
            if stop_at.contains(&current) {
                break ChainEnd::CommonAncestor(current);
            }
            let parents = graph.parents(&current)?;
            let Some((first, rest)) = parents.split_first() else {
                break ChainEnd::Root;
            };
            starts.extend(rest.iter().copied());
            current = *first;
        };
        chains.push(AncestorChain { commits, end });
    }
    Ok(chains)
}

/// Find the chains from tip `a` and tip `b` back to their shared history.
///
/// With `b` absent every chain of `a` runs to a root commit, which yields
/// all of `a`'s history.
pub fn find_chains<S>(graph: &mut CommitGraph<'_, S>, a: &ChunkId, b: Option<&ChunkId>) -> DagResult<AncestorChains>
where
    S: ChunkSource + ?Sized,
{
    let chains = match b {
        None => AncestorChains {
            ours: walk(graph, *a, &HashSet::new())?,
            theirs: Vec::new(),
        },
        Some(b) => {
            let a_history = graph.ancestors(a)?;
            let b_history = graph.ancestors(b)?;
            AncestorChains {
                ours: walk(graph, *a, &b_history)?,
                theirs: walk(graph, *b, &a_history)?,
            }
        }
    };
    debug!(
        ours = chains.ours.len(),
        theirs = chains.theirs.len(),
        loaded = graph.len(),
        "found ancestor chains"
    );
    Ok(chains)
}
