use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;
use vault_crypto::chunk_id;
use vault_types::ChunkId;

use crate::codec::{
    put_chunks, put_hashes, put_string, read_chunks, read_hash, read_hashes, read_string,
};
use crate::error::{ProtocolError, ProtocolResult};
use crate::opcode::{ErrorCode, Opcode, PutStatus};

/// A chunk on the wire: its claimed hash and its bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireChunk {
    pub id: ChunkId,
    pub data: Bytes,
}

impl WireChunk {
    /// Wrap `data`, hashing it for the id.
    pub fn new(data: Bytes) -> Self {
        Self {
            id: chunk_id(&data),
            data,
        }
    }

    /// Returns `true` if the bytes hash to the claimed id.
    pub fn verify(&self) -> bool {
        chunk_id(&self.data) == self.id
    }
}

/// A message sent by the initiator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Ask for the header of the branch's latest log entry.
    GetRemoteTip { branch: String },
    /// Fetch chunk bytes by hash.
    GetChunks { branch: String, ids: Vec<ChunkId> },
    /// Write chunks and append a log entry, if the branch is still at
    /// `expected_revision`.
    PutChunks {
        branch: String,
        expected_revision: u64,
        new_tip: ChunkId,
        message: String,
        chunks: Vec<WireChunk>,
    },
    /// Ask which of `ids` the responder already stores.
    HasChunks { branch: String, ids: Vec<ChunkId> },
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::GetRemoteTip { .. } => Opcode::GetRemoteTip,
            Self::GetChunks { .. } => Opcode::GetChunks,
            Self::PutChunks { .. } => Opcode::PutChunks,
            Self::HasChunks { .. } => Opcode::HasChunks,
        }
    }

    /// The branch this request targets.
    pub fn branch(&self) -> &str {
        match self {
            Self::GetRemoteTip { branch }
            | Self::GetChunks { branch, .. }
            | Self::PutChunks { branch, .. }
            | Self::HasChunks { branch, .. } => branch,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        buf.put_u32(self.opcode().code());
        match self {
            Self::GetRemoteTip { branch } => put_string(buf, branch),
            Self::GetChunks { branch, ids } | Self::HasChunks { branch, ids } => {
                put_string(buf, branch)?;
                put_hashes(buf, ids)
            }
            Self::PutChunks {
                branch,
                expected_revision,
                new_tip,
                message,
                chunks,
            } => {
                put_string(buf, branch)?;
                buf.put_u64(*expected_revision);
                buf.put_slice(new_tip.as_bytes());
                put_string(buf, message)?;
                put_chunks(buf, chunks)
            }
        }
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> ProtocolResult<()> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        trace!(opcode = %self.opcode(), bytes = buf.len(), "sending request");
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one request. Returns `None` if the pipe closed between messages.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Option<Self>> {
        let code = match reader.read_u32().await {
            Ok(code) => code,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let request = Self::read_body(reader, Opcode::from_code(code)?).await?;
        Ok(Some(request))
    }

    /// Read the body of a request whose opcode was already consumed.
    pub async fn read_body<R: AsyncRead + Unpin>(reader: &mut R, opcode: Opcode) -> ProtocolResult<Self> {
        let request = match opcode {
            Opcode::GetRemoteTip => Self::GetRemoteTip {
                branch: read_string(reader).await?,
            },
            Opcode::GetChunks => Self::GetChunks {
                branch: read_string(reader).await?,
                ids: read_hashes(reader).await?,
            },
            Opcode::HasChunks => Self::HasChunks {
                branch: read_string(reader).await?,
                ids: read_hashes(reader).await?,
            },
            Opcode::PutChunks => Self::PutChunks {
                branch: read_string(reader).await?,
                expected_revision: reader.read_u64().await?,
                new_tip: read_hash(reader).await?,
                message: read_string(reader).await?,
                chunks: read_chunks(reader).await?,
            },
            Opcode::Error => {
                return Err(ProtocolError::Malformed("ERROR is not a request".into()));
            }
        };
        Ok(request)
    }
}

/// A message sent by the responder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Header of the latest log entry; empty for an empty branch.
    RemoteTip { header: String },
    Chunks { chunks: Vec<WireChunk> },
    /// `revision` is the branch revision after the request was handled.
    PutChunks { status: PutStatus, revision: u64 },
    /// The requested hashes the responder already has.
    HasChunks { present: Vec<ChunkId> },
    Error { code: ErrorCode, message: String },
}

impl Response {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::RemoteTip { .. } => Opcode::GetRemoteTip,
            Self::Chunks { .. } => Opcode::GetChunks,
            Self::PutChunks { .. } => Opcode::PutChunks,
            Self::HasChunks { .. } => Opcode::HasChunks,
            Self::Error { .. } => Opcode::Error,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        buf.put_u32(self.opcode().code());
        match self {
            Self::RemoteTip { header } => put_string(buf, header),
            Self::Chunks { chunks } => put_chunks(buf, chunks),
            Self::PutChunks { status, revision } => {
                buf.put_u32(status.code());
                buf.put_u64(*revision);
                Ok(())
            }
            Self::HasChunks { present } => put_hashes(buf, present),
            Self::Error { code, message } => {
                buf.put_u32(code.code());
                // Oversized messages are cut rather than failing the error path.
                let mut end = message.len().min(u16::MAX as usize);
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                put_string(buf, &message[..end])
            }
        }
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> ProtocolResult<()> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        trace!(opcode = %self.opcode(), bytes = buf.len(), "sending response");
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read the response to a request with opcode `expected`.
    ///
    /// An `ERROR` frame is returned as [`Response::Error`]; any other opcode
    /// than `expected` is a protocol violation.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R, expected: Opcode) -> ProtocolResult<Self> {
        let actual = Opcode::from_code(reader.read_u32().await?)?;
        if actual != expected && actual != Opcode::Error {
            return Err(ProtocolError::UnexpectedResponse { expected, actual });
        }
        let response = match actual {
            Opcode::GetRemoteTip => Self::RemoteTip {
                header: read_string(reader).await?,
            },
            Opcode::GetChunks => Self::Chunks {
                chunks: read_chunks(reader).await?,
            },
            Opcode::PutChunks => Self::PutChunks {
                status: PutStatus::from_code(reader.read_u32().await?)?,
                revision: reader.read_u64().await?,
            },
            Opcode::HasChunks => Self::HasChunks {
                present: read_hashes(reader).await?,
            },
            Opcode::Error => Self::Error {
                code: ErrorCode::from_code(reader.read_u32().await?),
                message: read_string(reader).await?,
            },
        };
        Ok(response)
    }

    /// Turn an `ERROR` frame into [`ProtocolError::Remote`].
    pub fn into_result(self) -> ProtocolResult<Self> {
        match self {
            Self::Error { code, message } => Err(ProtocolError::Remote { code, message }),
            other => Ok(other),
        }
    }
}
