//! Chunk containers: one logical blob stored as a tree of chunks.
//!
//! Leaves are data chunks cut by the [`Chunker`]; interior nodes list up to
//! [`FANOUT`] child pointers in order. A blob that fits in one chunk is
//! referenced by its data pointer directly.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vault_store::{ChunkSink, ChunkSource};
use vault_types::ChunkId;

use crate::chunker::{ChunkConfig, Chunker};
use crate::codec::{encode_tagged, read_body, read_object, write_object};
use crate::error::{ObjectError, ObjectResult};
use crate::kind::{ContentPointer, ObjectKind};

/// Maximum number of children of an interior container node.
pub const FANOUT: usize = 64;

/// Upper bound on the buffer reserved up front by [`read_blob`]. Pointer
/// sizes come from stored trees and are not trusted past this.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Interior node of a chunk container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerNode {
    pub children: Vec<ContentPointer>,
}

impl ContainerNode {
    pub fn read<S: ChunkSource + ?Sized>(source: &S, id: &ChunkId) -> ObjectResult<Self> {
        read_object(source, id, ObjectKind::Container)
    }

    /// Total blob length under this node.
    pub fn size(&self) -> u64 {
        self.children.iter().map(|c| c.size).sum()
    }
}

/// Chunk `data`, stage every chunk in `sink`, and return the blob's pointer.
pub fn write_blob<K>(sink: &mut K, data: &[u8], config: &ChunkConfig) -> ObjectResult<ContentPointer>
where
    K: ChunkSink + ?Sized,
{
    let mut level = Vec::new();
    for piece in Chunker::new(data, *config)? {
        let id = sink.put(encode_tagged(ObjectKind::Data, piece))?;
        level.push(ContentPointer::new(id, ObjectKind::Data, piece.len() as u64));
    }
    if level.is_empty() {
        let id = sink.put(encode_tagged(ObjectKind::Data, &[]))?;
        return Ok(ContentPointer::new(id, ObjectKind::Data, 0));
    }

    let leaves = level.len();
    let mut height = 0;
    while level.len() > 1 {
        level = level
            .chunks(FANOUT)
            .map(|group| {
                let node = ContainerNode {
                    children: group.to_vec(),
                };
                let ptr = write_object(&mut *sink, ObjectKind::Container, &node)?;
                Ok(ContentPointer::new(ptr.id, ObjectKind::Container, node.size()))
            })
            .collect::<ObjectResult<Vec<_>>>()?;
        height += 1;
    }

    let root = level
        .pop()
        .ok_or_else(|| ObjectError::Codec("container build produced no root".into()))?;
    debug!(id = %root.id, size = root.size, leaves, height, "wrote blob");
    Ok(root)
}

/// Reassemble the blob referenced by `pointer`.
pub fn read_blob<S>(source: &S, pointer: &ContentPointer) -> ObjectResult<Vec<u8>>
where
    S: ChunkSource + ?Sized,
{
    let size_mismatch = |len: usize| {
        ObjectError::Codec(format!(
            "blob {} reassembled to {len} bytes, pointer says {}",
            pointer.id, pointer.size
        ))
    };

    let mut out = Vec::with_capacity(pointer.size.min(MAX_PREALLOC) as usize);
    let mut stack = vec![*pointer];
    while let Some(ptr) = stack.pop() {
        match ptr.kind {
            ObjectKind::Data => {
                out.extend_from_slice(&read_body(source, &ptr.id, ObjectKind::Data)?);
                if out.len() as u64 > pointer.size {
                    return Err(size_mismatch(out.len()));
                }
            }
            ObjectKind::Container => {
                let node = ContainerNode::read(source, &ptr.id)?;
                stack.extend(node.children.into_iter().rev());
            }
            other => {
                return Err(ObjectError::UnexpectedKind {
                    id: ptr.id,
                    expected: ObjectKind::Container,
                    actual: other,
                })
            }
        }
    }
    if out.len() as u64 != pointer.size {
        return Err(size_mismatch(out.len()));
    }
    Ok(out)
}

/// Every chunk id making up the blob, root first, without duplicates.
pub fn reachable_chunks<S>(source: &S, pointer: &ContentPointer) -> ObjectResult<Vec<ChunkId>>
where
    S: ChunkSource + ?Sized,
{
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    let mut stack = vec![*pointer];
    while let Some(ptr) = stack.pop() {
        if !seen.insert(ptr.id) {
            continue;
        }
        ids.push(ptr.id);
        if ptr.kind == ObjectKind::Container {
            let node = ContainerNode::read(source, &ptr.id)?;
            stack.extend(node.children.into_iter().rev());
        }
    }
    Ok(ids)
}
