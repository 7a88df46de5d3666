//! Copy-on-write editing of directory snapshots.
//!
//! A [`TreeAccessor`] starts from a stored root and keeps only the
//! directories on edited paths in memory. Everything else stays a pointer to
//! the immutable node it came from, so [`TreeAccessor::build`] writes new
//! nodes for the edited paths and shares every untouched subtree.

use std::collections::BTreeMap;

use vault_store::{ChunkSink, ChunkSource};

use crate::chunker::ChunkConfig;
use crate::container::{read_blob, write_blob};
use crate::error::{ObjectError, ObjectResult};
use crate::kind::ContentPointer;
use crate::tree::{empty_tree, validate_entry_name, DirectoryNode, TreeEntry};

#[derive(Clone, Debug)]
enum Slot {
    Stored(TreeEntry),
    Edited(EditDir),
}

#[derive(Clone, Debug, Default)]
struct EditDir {
    entries: BTreeMap<String, Slot>,
}

impl EditDir {
    fn from_node(node: &DirectoryNode) -> Self {
        Self {
            entries: node
                .iter()
                .map(|(name, entry)| (name.to_string(), Slot::Stored(*entry)))
                .collect(),
        }
    }
}

/// A directory being read, either edited in memory or as stored.
enum DirView<'a> {
    Edited(&'a EditDir),
    Stored(DirectoryNode),
}

enum Found<'a> {
    Edited(&'a EditDir),
    Entry(TreeEntry),
}

impl<'a> DirView<'a> {
    fn find(&self, name: &str) -> Option<Found<'a>> {
        match self {
            Self::Edited(dir) => dir.entries.get(name).map(|slot| match slot {
                Slot::Stored(entry) => Found::Entry(*entry),
                Slot::Edited(sub) => Found::Edited(sub),
            }),
            Self::Stored(node) => node.get(name).copied().map(Found::Entry),
        }
    }
}

/// Fold an edited directory into a node and hand it to `store`, children first.
fn seal(
    dir: &EditDir,
    store: &mut dyn FnMut(&DirectoryNode) -> ObjectResult<ContentPointer>,
) -> ObjectResult<ContentPointer> {
    let mut node = DirectoryNode::new();
    for (name, slot) in &dir.entries {
        let entry = match slot {
            Slot::Stored(entry) => *entry,
            Slot::Edited(sub) => TreeEntry::directory(seal(sub, store)?),
        };
        node.insert(name.clone(), entry)?;
    }
    store(&node)
}

fn hash_only(dir: &EditDir) -> ObjectResult<ContentPointer> {
    seal(dir, &mut |node| node.pointer())
}

fn slot_entry(slot: &Slot) -> ObjectResult<TreeEntry> {
    match slot {
        Slot::Stored(entry) => Ok(*entry),
        Slot::Edited(dir) => Ok(TreeEntry::directory(hash_only(dir)?)),
    }
}

/// Split a `/`-separated path into validated components.
fn split_path(path: &str) -> ObjectResult<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    for part in &parts {
        validate_entry_name(part)?;
    }
    Ok(parts)
}

/// Mutable, copy-on-write view of a directory tree.
#[derive(Clone, Debug)]
pub struct TreeAccessor {
    base: ContentPointer,
    root: EditDir,
}

impl TreeAccessor {
    /// Start editing from the stored directory `root`.
    pub fn open<S: ChunkSource + ?Sized>(source: &S, root: &ContentPointer) -> ObjectResult<Self> {
        let node = DirectoryNode::read(source, &root.id)?;
        Ok(Self {
            base: *root,
            root: EditDir::from_node(&node),
        })
    }

    /// Start from the empty tree.
    pub fn empty() -> Self {
        Self {
            base: empty_tree(),
            root: EditDir::default(),
        }
    }

    /// The root this accessor was opened on.
    pub fn base(&self) -> ContentPointer {
        self.base
    }

    /// The pointer the current root would be written under.
    pub fn root_pointer(&self) -> ObjectResult<ContentPointer> {
        hash_only(&self.root)
    }

    /// Returns `true` if the current contents differ from the base.
    pub fn is_modified(&self) -> ObjectResult<bool> {
        Ok(self.root_pointer()?.id != self.base.id)
    }

    fn view<'a, S>(&'a self, source: &S, parts: &[&str]) -> ObjectResult<Option<DirView<'a>>>
    where
        S: ChunkSource + ?Sized,
    {
        let mut view = DirView::Edited(&self.root);
        for name in parts {
            view = match view.find(name) {
                None => return Ok(None),
                Some(Found::Edited(dir)) => DirView::Edited(dir),
                Some(Found::Entry(entry)) if entry.is_dir() => {
                    DirView::Stored(DirectoryNode::read(source, &entry.id())?)
                }
                Some(Found::Entry(_)) => return Ok(None),
            };
        }
        Ok(Some(view))
    }

    /// Look up the entry at `path`. The empty path names the root directory.
    pub fn get<S: ChunkSource + ?Sized>(&self, source: &S, path: &str) -> ObjectResult<Option<TreeEntry>> {
        let parts = split_path(path)?;
        let Some((leaf, parents)) = parts.split_last() else {
            return Ok(Some(TreeEntry::directory(self.root_pointer()?)));
        };
        let Some(view) = self.view(source, parents)? else {
            return Ok(None);
        };
        match view.find(leaf) {
            None => Ok(None),
            Some(Found::Entry(entry)) => Ok(Some(entry)),
            Some(Found::Edited(dir)) => Ok(Some(TreeEntry::directory(hash_only(dir)?))),
        }
    }

    /// Entries of the directory at `path`, in name order.
    pub fn list<S: ChunkSource + ?Sized>(&self, source: &S, path: &str) -> ObjectResult<Vec<(String, TreeEntry)>> {
        let parts = split_path(path)?;
        match self.view(source, &parts)? {
            Some(DirView::Edited(dir)) => dir
                .entries
                .iter()
                .map(|(name, slot)| Ok((name.clone(), slot_entry(slot)?)))
                .collect(),
            Some(DirView::Stored(node)) => Ok(node
                .iter()
                .map(|(name, entry)| (name.to_string(), *entry))
                .collect()),
            None => match self.get(source, path)? {
                Some(_) => Err(ObjectError::NotADirectory(path.to_string())),
                None => Err(ObjectError::PathNotFound(path.to_string())),
            },
        }
    }

    /// Materialise the directory chain `parts` for editing, creating missing
    /// directories along the way.
    fn edit_dir<S>(&mut self, source: &S, parts: &[&str]) -> ObjectResult<&mut EditDir>
    where
        S: ChunkSource + ?Sized,
    {
        let mut dir = &mut self.root;
        for (depth, name) in parts.iter().enumerate() {
            let slot = dir
                .entries
                .entry(name.to_string())
                .or_insert_with(|| Slot::Edited(EditDir::default()));
            if let Slot::Stored(entry) = slot {
                if !entry.is_dir() {
                    return Err(ObjectError::NotADirectory(parts[..=depth].join("/")));
                }
                let node = DirectoryNode::read(source, &entry.id())?;
                *slot = Slot::Edited(EditDir::from_node(&node));
            }
            dir = match slot {
                Slot::Edited(sub) => sub,
                Slot::Stored(_) => return Err(ObjectError::NotADirectory(parts[..=depth].join("/"))),
            };
        }
        Ok(dir)
    }

    /// Place `entry` at `path`, creating parent directories. Returns the
    /// entry it replaced.
    pub fn put<S: ChunkSource + ?Sized>(
        &mut self,
        source: &S,
        path: &str,
        entry: TreeEntry,
    ) -> ObjectResult<Option<TreeEntry>> {
        let parts = split_path(path)?;
        let Some((leaf, parents)) = parts.split_last() else {
            return Err(ObjectError::InvalidName {
                name: path.to_string(),
                reason: "cannot replace the root directory".into(),
            });
        };
        let dir = self.edit_dir(source, parents)?;
        dir.entries
            .insert(leaf.to_string(), Slot::Stored(entry))
            .map(|old| slot_entry(&old))
            .transpose()
    }

    /// Remove the entry at `path`. Returns it, or `None` if nothing was there.
    pub fn remove<S: ChunkSource + ?Sized>(&mut self, source: &S, path: &str) -> ObjectResult<Option<TreeEntry>> {
        let parts = split_path(path)?;
        let Some((leaf, parents)) = parts.split_last() else {
            return Err(ObjectError::InvalidName {
                name: path.to_string(),
                reason: "cannot remove the root directory".into(),
            });
        };
        if self.get(source, path)?.is_none() {
            return Ok(None);
        }
        let dir = self.edit_dir(source, parents)?;
        dir.entries.remove(*leaf).map(|old| slot_entry(&old)).transpose()
    }

    /// Chunk `data` into `sink` and place it as a file at `path`.
    pub fn put_file<K: ChunkSink + ?Sized>(
        &mut self,
        sink: &mut K,
        path: &str,
        data: &[u8],
        config: &ChunkConfig,
    ) -> ObjectResult<ContentPointer> {
        let pointer = write_blob(sink, data, config)?;
        self.put(&*sink, path, TreeEntry::file(pointer))?;
        Ok(pointer)
    }

    /// Read the whole file at `path`.
    pub fn read_file<S: ChunkSource + ?Sized>(&self, source: &S, path: &str) -> ObjectResult<Vec<u8>> {
        match self.get(source, path)? {
            Some(entry) if entry.is_dir() => Err(ObjectError::NotAFile(path.to_string())),
            Some(entry) => read_blob(source, &entry.pointer),
            None => Err(ObjectError::PathNotFound(path.to_string())),
        }
    }

    /// Write every edited directory into `sink` and return the new root.
    ///
    /// The root node is always written, even when unchanged or empty, so the
    /// returned pointer can be read back from the sink's store.
    pub fn build<K: ChunkSink + ?Sized>(&self, sink: &mut K) -> ObjectResult<ContentPointer> {
        seal(&self.root, &mut |node| node.write(&mut *sink))
    }
}
