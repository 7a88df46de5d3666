//! Field-level encoders and async decoders shared by requests and responses.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use vault_types::{ChunkId, HASH_LEN};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::WireChunk;
use crate::opcode::{MAX_CHUNK_LEN, MAX_LIST_LEN};

pub fn put_string(buf: &mut BytesMut, value: &str) -> ProtocolResult<()> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::TooLarge {
        what: "string",
        len: value.len(),
        max: u16::MAX as usize,
    })?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn put_count(buf: &mut BytesMut, what: &'static str, count: usize) -> ProtocolResult<()> {
    if count > MAX_LIST_LEN {
        return Err(ProtocolError::TooLarge {
            what,
            len: count,
            max: MAX_LIST_LEN,
        });
    }
    // MAX_LIST_LEN fits an i32.
    buf.put_i32(count as i32);
    Ok(())
}

pub fn put_hashes(buf: &mut BytesMut, ids: &[ChunkId]) -> ProtocolResult<()> {
    put_count(buf, "hash list", ids.len())?;
    buf.reserve(ids.len() * HASH_LEN);
    for id in ids {
        buf.put_slice(id.as_bytes());
    }
    Ok(())
}

pub fn put_chunks(buf: &mut BytesMut, chunks: &[WireChunk]) -> ProtocolResult<()> {
    put_count(buf, "chunk list", chunks.len())?;
    for chunk in chunks {
        if chunk.data.len() > MAX_CHUNK_LEN {
            return Err(ProtocolError::TooLarge {
                what: "chunk",
                len: chunk.data.len(),
                max: MAX_CHUNK_LEN,
            });
        }
        buf.reserve(HASH_LEN + 4 + chunk.data.len());
        buf.put_slice(chunk.id.as_bytes());
        buf.put_i32(chunk.data.len() as i32);
        buf.put_slice(&chunk.data);
    }
    Ok(())
}

pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<String> {
    let len = reader.read_u16().await? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::Malformed("string is not UTF-8".into()))
}

async fn read_count<R: AsyncRead + Unpin>(reader: &mut R, what: &'static str) -> ProtocolResult<usize> {
    let count = reader.read_i32().await?;
    let count = usize::try_from(count)
        .map_err(|_| ProtocolError::Malformed(format!("negative {what} count {count}")))?;
    if count > MAX_LIST_LEN {
        return Err(ProtocolError::TooLarge {
            what,
            len: count,
            max: MAX_LIST_LEN,
        });
    }
    Ok(count)
}

pub async fn read_hash<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<ChunkId> {
    let mut hash = [0u8; HASH_LEN];
    reader.read_exact(&mut hash).await?;
    Ok(ChunkId::from_hash(hash))
}

pub async fn read_hashes<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Vec<ChunkId>> {
    let count = read_count(reader, "hash list").await?;
    let mut ids = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        ids.push(read_hash(reader).await?);
    }
    Ok(ids)
}

pub async fn read_chunks<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Vec<WireChunk>> {
    let count = read_count(reader, "chunk list").await?;
    let mut chunks = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let id = read_hash(reader).await?;
        let len = reader.read_i32().await?;
        let len = usize::try_from(len)
            .map_err(|_| ProtocolError::Malformed(format!("negative chunk length {len}")))?;
        if len > MAX_CHUNK_LEN {
            return Err(ProtocolError::TooLarge {
                what: "chunk",
                len,
                max: MAX_CHUNK_LEN,
            });
        }
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).await?;
        chunks.push(WireChunk {
            id,
            data: Bytes::from(data),
        });
    }
    Ok(chunks)
}
