use std::collections::HashSet;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;
use vault_log::parse_header;
use vault_protocol::{ErrorCode, ProtocolError, PutStatus, Request, Response, WireChunk, MAX_LIST_LEN};
use vault_types::ChunkId;

use crate::error::{SyncError, SyncResult};

/// Ids per `HAS_CHUNKS` request.
const HAS_BATCH_SIZE: usize = 4096;

/// The requesting side of a sync pipe. One request is in flight at a time.
pub struct Initiator<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Initiator<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Send `request` and read its response. `ERROR` frames become errors.
    pub async fn exchange(&mut self, request: &Request) -> SyncResult<Response> {
        request.write_to(&mut self.writer).await?;
        let response = Response::read_from(&mut self.reader, request.opcode()).await?;
        trace!(opcode = %request.opcode(), "exchange complete");
        match response {
            Response::Error {
                code: ErrorCode::AccessDenied,
                message,
            } => Err(SyncError::AccessDenied(message)),
            Response::Error { code, message } => Err(SyncError::Remote { code, message }),
            other => Ok(other),
        }
    }

    /// Revision and commit id of the remote tip; `None` for an empty branch.
    pub async fn remote_tip(&mut self, branch: &str) -> SyncResult<Option<(u64, ChunkId)>> {
        let request = Request::GetRemoteTip {
            branch: branch.to_string(),
        };
        match self.exchange(&request).await? {
            Response::RemoteTip { header } => Ok(parse_header(&header)?),
            other => Err(unexpected(&request, &other)),
        }
    }

    /// Which of `ids` the remote already stores.
    pub async fn has_chunks(&mut self, branch: &str, ids: &[ChunkId]) -> SyncResult<HashSet<ChunkId>> {
        let mut present = HashSet::new();
        for batch in ids.chunks(HAS_BATCH_SIZE) {
            let request = Request::HasChunks {
                branch: branch.to_string(),
                ids: batch.to_vec(),
            };
            match self.exchange(&request).await? {
                Response::HasChunks { present: found } => present.extend(found),
                other => return Err(unexpected(&request, &other)),
            }
        }
        Ok(present)
    }

    /// Fetch `ids`, in order. Every chunk is checked against its hash.
    pub async fn get_chunks(&mut self, branch: &str, ids: &[ChunkId]) -> SyncResult<Vec<WireChunk>> {
        let request = Request::GetChunks {
            branch: branch.to_string(),
            ids: ids.to_vec(),
        };
        let chunks = match self.exchange(&request).await? {
            Response::Chunks { chunks } => chunks,
            other => return Err(unexpected(&request, &other)),
        };
        for (i, want) in ids.iter().enumerate() {
            let Some(chunk) = chunks.get(i) else {
                return Err(SyncError::MissingChunk(*want));
            };
            if chunk.id != *want {
                return Err(SyncError::MissingChunk(*want));
            }
            if !chunk.verify() {
                return Err(SyncError::HashMismatch(chunk.id));
            }
        }
        Ok(chunks)
    }

    /// Upload `chunks` and move the remote branch to `new_tip` if it is
    /// still at `expected_revision`. Returns the status and the remote
    /// revision afterwards.
    pub async fn put_chunks(
        &mut self,
        branch: &str,
        expected_revision: u64,
        new_tip: ChunkId,
        message: &str,
        chunks: Vec<WireChunk>,
    ) -> SyncResult<(PutStatus, u64)> {
        if chunks.len() > MAX_LIST_LEN {
            return Err(ProtocolError::TooLarge {
                what: "chunk list",
                len: chunks.len(),
                max: MAX_LIST_LEN,
            }
            .into());
        }
        let request = Request::PutChunks {
            branch: branch.to_string(),
            expected_revision,
            new_tip,
            message: message.to_string(),
            chunks,
        };
        match self.exchange(&request).await? {
            Response::PutChunks { status, revision } => Ok((status, revision)),
            other => Err(unexpected(&request, &other)),
        }
    }
}

fn unexpected(request: &Request, response: &Response) -> SyncError {
    ProtocolError::UnexpectedResponse {
        expected: request.opcode(),
        actual: response.opcode(),
    }
    .into()
}

impl<R, W> std::fmt::Debug for Initiator<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initiator").finish_non_exhaustive()
    }
}
