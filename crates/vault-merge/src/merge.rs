use tracing::{debug, info};
use vault_crypto::CommitSigner;
use vault_dag::{find_chains, CommitGraph};
use vault_diff::{diff_trees, ChangeKind};
use vault_object::{CommitRecord, ContentPointer, TreeAccessor};
use vault_store::{ChunkSink, ChunkSource};
use vault_types::ChunkId;

use crate::conflict::{Conflict, Resolver};
use crate::error::{MergeError, MergeResult};

/// Result of [`merge_commits`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Theirs is already part of our history.
    UpToDate,
    /// Ours is part of their history; the tip can move to theirs unchanged.
    FastForward(ChunkId),
    /// A merge commit was written.
    Merged(ContentPointer),
}

/// Merge the changes from `parent` to `theirs` into `ours`.
///
/// Each path that differs between `ours` and `theirs` is settled against
/// `parent`:
///
/// - Added in theirs: taken if the parent lacked it, otherwise we deleted it
///   and it stays deleted.
/// - Missing from theirs: removed if the parent had it, otherwise it is ours
///   and stays.
/// - Modified on both sides: if either side still equals the parent's entry
///   only the other side changed, and that change is taken without asking
///   `resolver`. Only files changed on both sides reach the resolver, so
///   `theirs_wins` never throws away an edit they did not touch.
/// - A file on one side and a directory on the other keeps ours.
///
/// Returns an accessor seeded from `ours` holding the merged tree; nothing
/// is written until the caller builds it.
pub fn merge_trees<S>(
    source: &S,
    parent: &ContentPointer,
    ours: &ContentPointer,
    theirs: &ContentPointer,
    resolver: Resolver<'_>,
) -> MergeResult<TreeAccessor>
where
    S: ChunkSource + ?Sized,
{
    let base = TreeAccessor::open(source, parent)?;
    let mut merged = TreeAccessor::open(source, ours)?;
    let mut conflicts = 0usize;

    for change in diff_trees(source, ours, theirs) {
        let change = change?;
        let in_parent = base.get(source, &change.path)?;
        match (change.kind, change.ours, change.theirs) {
            (ChangeKind::Added, _, Some(theirs_entry)) => {
                // Absent from the parent: they added it. Present: we deleted it.
                if in_parent.is_none() {
                    merged.put(source, &change.path, theirs_entry)?;
                }
            }
            (ChangeKind::Removed, Some(_), _) => {
                // Present in the parent: they deleted it. Absent: we added it.
                if in_parent.is_some() {
                    merged.remove(source, &change.path)?;
                }
            }
            (ChangeKind::Modified, Some(o), Some(t)) => {
                if o.is_dir() && t.is_dir() {
                    // The nested levels arrive later in the diff.
                    continue;
                }
                if in_parent == Some(t) {
                    continue;
                }
                if in_parent == Some(o) {
                    merged.put(source, &change.path, t)?;
                    continue;
                }
                if o.is_dir() || t.is_dir() {
                    debug!(path = %change.path, "file/directory clash, keeping ours");
                    continue;
                }
                let conflict = Conflict {
                    path: change.path,
                    ours: o,
                    theirs: t,
                    parent: in_parent,
                };
                let resolved = resolver(&conflict)?;
                debug!(path = %conflict.path, "resolved conflict");
                merged.put(source, &conflict.path, resolved)?;
                conflicts += 1;
            }
            _ => {}
        }
    }

    debug!(conflicts, "merged trees");
    Ok(merged)
}

/// Merge commit `theirs` into `ours`, writing any new objects into `sink`.
///
/// Handles the trivial cases first: if either tip already contains the
/// other no merge commit is written.
pub fn merge_commits<K>(
    sink: &mut K,
    ours: &ChunkId,
    theirs: &ChunkId,
    message: impl Into<Vec<u8>>,
    resolver: Resolver<'_>,
    signer: Option<&dyn CommitSigner>,
) -> MergeResult<MergeOutcome>
where
    K: ChunkSink + ?Sized,
{
    let base = {
        let mut graph = CommitGraph::new(&*sink);
        if graph.is_ancestor(theirs, ours)? {
            return Ok(MergeOutcome::UpToDate);
        }
        if graph.is_ancestor(ours, theirs)? {
            return Ok(MergeOutcome::FastForward(*theirs));
        }
        let chains = find_chains(&mut graph, ours, Some(theirs))?;
        chains
            .merge_base(&mut graph)?
            .ok_or(MergeError::UnrelatedHistories {
                ours: *ours,
                theirs: *theirs,
            })?
    };

    let base_tree = CommitRecord::read(&*sink, &base)?.tree;
    let ours_tree = CommitRecord::read(&*sink, ours)?.tree;
    let theirs_tree = CommitRecord::read(&*sink, theirs)?.tree;

    let merged = merge_trees(&*sink, &base_tree, &ours_tree, &theirs_tree, resolver)?;
    let tree = merged.build(&mut *sink)?;

    let parents = vec![
        CommitRecord::pointer(&*sink, ours)?,
        CommitRecord::pointer(&*sink, theirs)?,
    ];
    let mut commit = CommitRecord::new(tree, parents, message);
    if let Some(signer) = signer {
        commit.sign(signer)?;
    }
    let ptr = commit.write(sink)?;
    info!(id = %ptr.id, base = %base, ours = %ours, theirs = %theirs, "wrote merge commit");
    Ok(MergeOutcome::Merged(ptr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ours_wins, theirs_wins};
    use vault_crypto::{Ed25519Verifier, SigningKey};
    use vault_object::{read_blob, ChunkConfig, EntryKind, TreeEntry};
    use vault_store::{InMemoryChunkStore, Transaction};

    fn tree(store: &InMemoryChunkStore, files: &[(&str, &str)]) -> ContentPointer {
        let mut tx = Transaction::begin(store);
        let mut acc = TreeAccessor::empty();
        for (path, data) in files {
            acc.put_file(&mut tx, path, data.as_bytes(), &ChunkConfig::default())
                .unwrap();
        }
        let root = acc.build(&mut tx).unwrap();
        tx.commit().unwrap();
        root
    }

    fn commit(store: &InMemoryChunkStore, files: &[(&str, &str)], parents: &[ChunkId]) -> ChunkId {
        let root = tree(store, files);
        let mut tx = Transaction::begin(store);
        let parents = parents
            .iter()
            .map(|id| CommitRecord::pointer(&tx, id).unwrap())
            .collect();
        let ptr = CommitRecord::new(root, parents, "c").write(&mut tx).unwrap();
        tx.commit().unwrap();
        ptr.id
    }

    fn merged_files(
        store: &InMemoryChunkStore,
        parent: &[(&str, &str)],
        ours: &[(&str, &str)],
        theirs: &[(&str, &str)],
        resolver: Resolver<'_>,
    ) -> Vec<(String, String)> {
        let (p, o, t) = (tree(store, parent), tree(store, ours), tree(store, theirs));
        let merged = merge_trees(store, &p, &o, &t, resolver).unwrap();
        let mut tx = Transaction::begin(store);
        let root = merged.build(&mut tx).unwrap();
        tx.commit().unwrap();
        flatten(store, &root)
    }

    fn flatten(store: &InMemoryChunkStore, root: &ContentPointer) -> Vec<(String, String)> {
        let acc = TreeAccessor::open(store, root).unwrap();
        let mut out = Vec::new();
        let mut dirs = vec![String::new()];
        while let Some(dir) = dirs.pop() {
            for (name, entry) in acc.list(store, &dir).unwrap() {
                let path = if dir.is_empty() { name } else { format!("{dir}/{name}") };
                match entry.kind {
                    EntryKind::Directory => dirs.push(path),
                    EntryKind::File => {
                        let data = read_blob(store, &entry.pointer).unwrap();
                        out.push((path, String::from_utf8(data).unwrap()));
                    }
                }
            }
        }
        out.sort();
        out
    }

    fn files(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut v: Vec<_> = pairs.iter().map(|(p, d)| (p.to_string(), d.to_string())).collect();
        v.sort();
        v
    }

    // -----------------------------------------------------------------------
    // Tree merge rules
    // -----------------------------------------------------------------------

    #[test]
    fn one_sided_changes_combine() {
        let store = InMemoryChunkStore::new();
        let parent = [("a", "1"), ("b", "1"), ("dir/c", "1")];
        let ours = [("a", "ours"), ("b", "1"), ("dir/c", "1"), ("new-ours", "x")];
        let theirs = [("a", "1"), ("dir/c", "theirs"), ("new-theirs", "y")];
        let result = merged_files(&store, &parent, &ours, &theirs, &ours_wins);
        assert_eq!(
            result,
            files(&[
                ("a", "ours"),
                ("dir/c", "theirs"),
                ("new-ours", "x"),
                ("new-theirs", "y"),
            ])
        );
    }

    #[test]
    fn one_sided_edits_bypass_the_resolver() {
        let store = InMemoryChunkStore::new();
        let refuse = |c: &Conflict| -> MergeResult<TreeEntry> {
            Err(MergeError::Unresolved {
                path: c.path.clone(),
                reason: "resolver must not run".into(),
            })
        };
        let parent = [("a", "1"), ("b", "1")];
        let ours = [("a", "ours"), ("b", "1")];
        let theirs = [("a", "1"), ("b", "theirs")];
        let expected = files(&[("a", "ours"), ("b", "theirs")]);

        assert_eq!(merged_files(&store, &parent, &ours, &theirs, &refuse), expected);
        assert_eq!(merged_files(&store, &parent, &ours, &theirs, &theirs_wins), expected);
    }

    #[test]
    fn deletions_stick() {
        let store = InMemoryChunkStore::new();
        let parent = [("keep", "k"), ("we-delete", "1"), ("they-delete", "2")];
        let ours = [("keep", "k"), ("they-delete", "2")];
        let theirs = [("keep", "k"), ("we-delete", "1")];
        let result = merged_files(&store, &parent, &ours, &theirs, &ours_wins);
        assert_eq!(result, files(&[("keep", "k")]));
    }

    #[test]
    fn conflicts_go_to_the_resolver() {
        let store = InMemoryChunkStore::new();
        let parent = [("f", "base")];
        let ours = [("f", "ours")];
        let theirs = [("f", "theirs")];

        let result = merged_files(&store, &parent, &ours, &theirs, &ours_wins);
        assert_eq!(result, files(&[("f", "ours")]));
        let result = merged_files(&store, &parent, &ours, &theirs, &theirs_wins);
        assert_eq!(result, files(&[("f", "theirs")]));
    }

    #[test]
    fn resolver_sees_all_three_versions() {
        let store = InMemoryChunkStore::new();
        let seen = std::cell::RefCell::new(Vec::new());
        let recording = |c: &Conflict| -> MergeResult<TreeEntry> {
            seen.borrow_mut().push((c.path.clone(), c.parent.is_some()));
            Ok(c.theirs)
        };
        merged_files(
            &store,
            &[("x/f", "base")],
            &[("x/f", "ours"), ("g", "ours")],
            &[("x/f", "theirs"), ("g", "theirs")],
            &recording,
        );
        assert_eq!(
            seen.into_inner(),
            vec![("g".to_string(), false), ("x/f".to_string(), true)]
        );
    }

    #[test]
    fn failing_resolver_aborts() {
        let store = InMemoryChunkStore::new();
        let refuse = |c: &Conflict| -> MergeResult<TreeEntry> {
            Err(MergeError::Unresolved {
                path: c.path.clone(),
                reason: "manual merge required".into(),
            })
        };
        let (p, o, t) = (
            tree(&store, &[("f", "0")]),
            tree(&store, &[("f", "1")]),
            tree(&store, &[("f", "2")]),
        );
        assert!(matches!(
            merge_trees(&store, &p, &o, &t, &refuse),
            Err(MergeError::Unresolved { .. })
        ));
    }

    #[test]
    fn merge_is_idempotent_when_theirs_is_parent() {
        let store = InMemoryChunkStore::new();
        let parent = tree(&store, &[("a", "1"), ("d/b", "2"), ("d/e/f", "3")]);
        let ours = tree(&store, &[("a", "changed"), ("d/e/f", "3"), ("z", "new")]);
        // Any resolver must be irrelevant here.
        let panicking = |_: &Conflict| -> MergeResult<TreeEntry> { panic!("no conflicts expected") };
        let merged = merge_trees(&store, &parent, &ours, &parent, &panicking).unwrap();
        assert_eq!(merged.root_pointer().unwrap(), ours);
    }

    #[test]
    fn file_directory_clash_keeps_ours() {
        let store = InMemoryChunkStore::new();
        let result = merged_files(
            &store,
            &[("p", "file")],
            &[("p", "edited")],
            &[("p/inner", "dir now")],
            &theirs_wins,
        );
        assert_eq!(result, files(&[("p", "edited")]));
    }

    // -----------------------------------------------------------------------
    // Commit merge
    // -----------------------------------------------------------------------

    #[test]
    fn merge_commits_trivial_cases() {
        let store = InMemoryChunkStore::new();
        let a = commit(&store, &[("f", "1")], &[]);
        let b = commit(&store, &[("f", "2")], &[a]);

        let mut tx = Transaction::begin(&store);
        assert_eq!(
            merge_commits(&mut tx, &b, &a, "m", &ours_wins, None).unwrap(),
            MergeOutcome::UpToDate
        );
        assert_eq!(
            merge_commits(&mut tx, &b, &b, "m", &ours_wins, None).unwrap(),
            MergeOutcome::UpToDate
        );
        assert_eq!(
            merge_commits(&mut tx, &a, &b, "m", &ours_wins, None).unwrap(),
            MergeOutcome::FastForward(b)
        );
        assert!(tx.is_empty());
    }

    #[test]
    fn merge_commits_writes_two_parent_commit() {
        let store = InMemoryChunkStore::new();
        let base = commit(&store, &[("a", "1"), ("b", "1")], &[]);
        let ours = commit(&store, &[("a", "ours"), ("b", "1")], &[base]);
        let theirs = commit(&store, &[("a", "1"), ("b", "theirs")], &[base]);
        let key = SigningKey::generate();

        let mut tx = Transaction::begin(&store);
        let outcome =
            merge_commits(&mut tx, &ours, &theirs, "merge", &ours_wins, Some(&key as &dyn CommitSigner))
                .unwrap();
        tx.commit().unwrap();

        let MergeOutcome::Merged(ptr) = outcome else {
            panic!("expected a merge commit, got {outcome:?}");
        };
        let record = CommitRecord::read(&store, &ptr.id).unwrap();
        assert_eq!(record.parent_ids(), vec![ours, theirs]);
        assert!(record.verify(&Ed25519Verifier).unwrap());
        assert_eq!(
            flatten(&store, &record.tree),
            files(&[("a", "ours"), ("b", "theirs")])
        );
    }

    #[test]
    fn unrelated_histories_are_refused() {
        let store = InMemoryChunkStore::new();
        let a = commit(&store, &[("f", "1")], &[]);
        let z = commit(&store, &[("g", "1")], &[]);
        let mut tx = Transaction::begin(&store);
        assert!(matches!(
            merge_commits(&mut tx, &a, &z, "m", &ours_wins, None),
            Err(MergeError::UnrelatedHistories { .. })
        ));
    }
}
