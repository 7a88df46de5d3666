use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use vault_crypto::chunk_id;
use vault_store::{ChunkSink, ChunkSource};
use vault_types::ChunkId;

use crate::codec::{encode_object, encode_tagged, read_object};
use crate::container::reachable_chunks;
use crate::error::{ObjectError, ObjectResult};
use crate::kind::{ContentPointer, ObjectKind};

/// Longest allowed entry name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Bincode body of a directory with no entries: a zero u64 length.
const EMPTY_DIRECTORY_BODY: [u8; 8] = [0; 8];

/// Whether a directory entry is a file or a sub-directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// One named entry of a [`DirectoryNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEntry {
    pub kind: EntryKind,
    pub pointer: ContentPointer,
}

impl TreeEntry {
    pub fn file(pointer: ContentPointer) -> Self {
        Self {
            kind: EntryKind::File,
            pointer,
        }
    }

    pub fn directory(pointer: ContentPointer) -> Self {
        Self {
            kind: EntryKind::Directory,
            pointer,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn id(&self) -> ChunkId {
        self.pointer.id
    }
}

/// Check that `name` can be a single path component.
pub fn validate_entry_name(name: &str) -> ObjectResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == "." || name == ".." {
        "name is a relative path component"
    } else if name.contains('/') {
        "name contains '/'"
    } else if name.contains('\0') {
        "name contains a NUL byte"
    } else if name.len() > MAX_NAME_LEN {
        "name is too long"
    } else {
        return Ok(());
    };
    Err(ObjectError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// An immutable directory snapshot: names in lexicographic order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    entries: BTreeMap<String, TreeEntry>,
}

impl DirectoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.get(name)
    }

    /// Insert or replace an entry. Returns the previous entry under `name`.
    pub fn insert(&mut self, name: impl Into<String>, entry: TreeEntry) -> ObjectResult<Option<TreeEntry>> {
        let name = name.into();
        validate_entry_name(&name)?;
        Ok(self.entries.insert(name, entry))
    }

    pub fn remove(&mut self, name: &str) -> Option<TreeEntry> {
        self.entries.remove(name)
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TreeEntry)> {
        self.entries.iter().map(|(n, e)| (n.as_str(), e))
    }

    pub fn encode(&self) -> ObjectResult<Bytes> {
        encode_object(ObjectKind::Directory, self)
    }

    /// The pointer this node would be stored under, without storing it.
    pub fn pointer(&self) -> ObjectResult<ContentPointer> {
        let chunk = self.encode()?;
        Ok(ContentPointer::new(
            chunk_id(&chunk),
            ObjectKind::Directory,
            chunk.len() as u64,
        ))
    }

    pub fn write<K: ChunkSink + ?Sized>(&self, sink: &mut K) -> ObjectResult<ContentPointer> {
        let chunk = self.encode()?;
        let size = chunk.len() as u64;
        let id = sink.put(chunk)?;
        Ok(ContentPointer::new(id, ObjectKind::Directory, size))
    }

    /// Read the node under `id`. The empty tree is recognised without a read.
    pub fn read<S: ChunkSource + ?Sized>(source: &S, id: &ChunkId) -> ObjectResult<Self> {
        if *id == empty_tree().id {
            return Ok(Self::new());
        }
        let node: Self = read_object(source, id, ObjectKind::Directory)?;
        Ok(node)
    }
}

impl<'a> IntoIterator for &'a DirectoryNode {
    type Item = (&'a String, &'a TreeEntry);
    type IntoIter = std::collections::btree_map::Iter<'a, String, TreeEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Pointer of the directory with no entries.
///
/// Usable as a diff base even in a store that has never held it.
pub fn empty_tree() -> ContentPointer {
    let chunk = encode_tagged(ObjectKind::Directory, &EMPTY_DIRECTORY_BODY);
    ContentPointer::new(chunk_id(&chunk), ObjectKind::Directory, chunk.len() as u64)
}

/// Every chunk reachable from the directory `root`: directory nodes and the
/// full container of every file, without duplicates.
pub fn subtree_chunks<S>(source: &S, root: &ContentPointer) -> ObjectResult<Vec<ChunkId>>
where
    S: ChunkSource + ?Sized,
{
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut dirs = vec![root.id];
    while let Some(dir) = dirs.pop() {
        if !seen.insert(dir) {
            continue;
        }
        ids.push(dir);
        let node = DirectoryNode::read(source, &dir)?;
        for (_, entry) in node.iter() {
            match entry.kind {
                EntryKind::Directory => dirs.push(entry.id()),
                EntryKind::File => {
                    for id in reachable_chunks(source, &entry.pointer)? {
                        if seen.insert(id) {
                            ids.push(id);
                        }
                    }
                }
            }
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkConfig;
    use crate::container::write_blob;
    use vault_store::{ChunkStore, InMemoryChunkStore, Transaction};

    #[test]
    fn empty_tree_matches_encoded_empty_node() {
        let ptr = DirectoryNode::new().pointer().unwrap();
        assert_eq!(ptr, empty_tree());
    }

    #[test]
    fn empty_tree_reads_without_store() {
        let store = InMemoryChunkStore::new();
        let node = DirectoryNode::read(&store, &empty_tree().id).unwrap();
        assert!(node.is_empty());
    }

    #[test]
    fn entry_names_are_validated() {
        for bad in ["", ".", "..", "a/b", "nul\0"] {
            assert!(validate_entry_name(bad).is_err(), "{bad:?}");
        }
        assert!(validate_entry_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
        validate_entry_name("notes.txt").unwrap();

        let mut node = DirectoryNode::new();
        let file = TreeEntry::file(empty_tree());
        assert!(node.insert("bad/name", file).is_err());
        assert!(node.is_empty());
    }

    #[test]
    fn entries_iterate_in_name_order() {
        let mut node = DirectoryNode::new();
        let file = TreeEntry::file(empty_tree());
        for name in ["zeta", "alpha", "Mid", "beta"] {
            node.insert(name, file).unwrap();
        }
        let names: Vec<&str> = node.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Mid", "alpha", "beta", "zeta"]);
    }

    #[test]
    fn write_then_read() {
        let store = InMemoryChunkStore::new();
        let mut tx = Transaction::begin(&store);
        let blob = write_blob(&mut tx, b"contents", &ChunkConfig::default()).unwrap();
        let mut node = DirectoryNode::new();
        node.insert("file.txt", TreeEntry::file(blob)).unwrap();
        let ptr = node.write(&mut tx).unwrap();
        assert_eq!(ptr, node.pointer().unwrap());
        tx.commit().unwrap();

        let back = DirectoryNode::read(&store, &ptr.id).unwrap();
        assert_eq!(back, node);
        assert_eq!(back.get("file.txt").unwrap().pointer, blob);
    }

    #[test]
    fn subtree_chunks_collects_everything() {
        let store = InMemoryChunkStore::new();
        let mut tx = Transaction::begin(&store);
        let a = write_blob(&mut tx, b"a", &ChunkConfig::default()).unwrap();
        let b = write_blob(&mut tx, b"b", &ChunkConfig::default()).unwrap();

        let mut inner = DirectoryNode::new();
        inner.insert("b.txt", TreeEntry::file(b)).unwrap();
        // Same blob twice: collected once.
        inner.insert("a-copy.txt", TreeEntry::file(a)).unwrap();
        let inner_ptr = inner.write(&mut tx).unwrap();

        let mut root = DirectoryNode::new();
        root.insert("a.txt", TreeEntry::file(a)).unwrap();
        root.insert("sub", TreeEntry::directory(inner_ptr)).unwrap();
        let root_ptr = root.write(&mut tx).unwrap();
        tx.commit().unwrap();

        let mut ids = subtree_chunks(&store, &root_ptr).unwrap();
        assert_eq!(ids[0], root_ptr.id);
        ids.sort();
        assert_eq!(ids, store.ids().unwrap());
    }
}
