//! Tagged chunk encoding.
//!
//! ```text
//! chunk = [1 byte: ObjectKind tag] [body]
//! ```
//! Data chunks carry raw bytes as their body; every other kind carries a
//! bincode encoding. Because the id is the hash of the whole chunk, two
//! objects of different kinds never share an id.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use vault_store::{ChunkSink, ChunkSource};
use vault_types::ChunkId;

use crate::error::{ObjectError, ObjectResult};
use crate::kind::{ContentPointer, ObjectKind};

/// Prefix `body` with the tag of `kind`.
pub fn encode_tagged(kind: ObjectKind, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(kind.tag());
    buf.put_slice(body);
    buf.freeze()
}

/// Encode a structured object into chunk bytes.
pub fn encode_object<T: Serialize>(kind: ObjectKind, value: &T) -> ObjectResult<Bytes> {
    let body = bincode::serialize(value).map_err(|e| ObjectError::Codec(e.to_string()))?;
    Ok(encode_tagged(kind, &body))
}

/// Split a chunk into its kind and body.
pub fn split_tag(id: &ChunkId, chunk: &Bytes) -> ObjectResult<(ObjectKind, Bytes)> {
    let tag = *chunk.first().ok_or(ObjectError::Untagged(*id))?;
    let kind = ObjectKind::from_tag(tag).ok_or(ObjectError::UnknownTag { id: *id, tag })?;
    Ok((kind, chunk.slice(1..)))
}

/// Encode `value` and stage it in `sink`. The pointer's size is the chunk length.
pub fn write_object<T, K>(sink: &mut K, kind: ObjectKind, value: &T) -> ObjectResult<ContentPointer>
where
    T: Serialize,
    K: ChunkSink + ?Sized,
{
    let chunk = encode_object(kind, value)?;
    let size = chunk.len() as u64;
    let id = sink.put(chunk)?;
    Ok(ContentPointer::new(id, kind, size))
}

/// Read and decode the object stored under `id`, checking its kind.
pub fn read_object<T, S>(source: &S, id: &ChunkId, expected: ObjectKind) -> ObjectResult<T>
where
    T: DeserializeOwned,
    S: ChunkSource + ?Sized,
{
    let body = read_body(source, id, expected)?;
    bincode::deserialize(&body).map_err(|e| ObjectError::Codec(format!("{id}: {e}")))
}

/// Read the body of the chunk under `id`, checking its kind.
pub fn read_body<S>(source: &S, id: &ChunkId, expected: ObjectKind) -> ObjectResult<Bytes>
where
    S: ChunkSource + ?Sized,
{
    let chunk = source.get(id)?;
    let (actual, body) = split_tag(id, &chunk)?;
    if actual != expected {
        return Err(ObjectError::UnexpectedKind {
            id: *id,
            expected,
            actual,
        });
    }
    Ok(body)
}

/// The kind of the object under `id`.
pub fn peek_kind<S: ChunkSource + ?Sized>(source: &S, id: &ChunkId) -> ObjectResult<ObjectKind> {
    let chunk = source.get(id)?;
    Ok(split_tag(id, &chunk)?.0)
}
