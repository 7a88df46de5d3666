//! Turning a directory on disk into a tree.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{debug, warn};
use vault_object::{empty_tree, ChunkConfig, ContentPointer, TreeAccessor, TreeEntry};
use vault_store::ChunkSink;
use walkdir::WalkDir;

#[derive(Debug)]
pub struct Snapshot {
    pub root: ContentPointer,
    pub files: usize,
    pub bytes: u64,
}

/// Chunk every file under `source` into `sink` and build the tree.
///
/// Paths in `skip` (and everything below them) are left out. Symlinks are
/// skipped; empty directories are kept.
pub fn snapshot_dir<K>(sink: &mut K, source: &Path, skip: &[PathBuf], config: &ChunkConfig) -> anyhow::Result<Snapshot>
where
    K: ChunkSink + ?Sized,
{
    let source = source
        .canonicalize()
        .with_context(|| format!("cannot open {}", source.display()))?;
    let mut tree = TreeAccessor::empty();
    let mut files = 0;
    let mut bytes = 0u64;

    let walker = WalkDir::new(&source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skip.iter().any(|s| s == e.path()));
    for entry in walker {
        let entry = entry?;
        let relative = entry.path().strip_prefix(&source)?;
        let Some(path) = relative.to_str().map(|p| p.replace(std::path::MAIN_SEPARATOR, "/")) else {
            bail!("path is not valid UTF-8: {}", relative.display());
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            if tree.get(&*sink, &path)?.is_none() {
                tree.put(&*sink, &path, TreeEntry::directory(empty_tree()))?;
            }
        } else if file_type.is_file() {
            let data = std::fs::read(entry.path())
                .with_context(|| format!("reading {}", entry.path().display()))?;
            bytes += data.len() as u64;
            tree.put_file(&mut *sink, &path, &data, config)?;
            files += 1;
        } else {
            warn!(path, "skipping special file");
        }
    }

    let root = tree.build(sink)?;
    debug!(root = %root.id, files, bytes, "snapshot built");
    Ok(Snapshot { root, files, bytes })
}
