use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};
use vault_log::LogError;
use vault_object::{CommitRecord, ObjectError};
use vault_protocol::{ErrorCode, ProtocolError, PutStatus, Request, Response, WireChunk};
use vault_store::{ChunkSource, StoreError, Transaction};
use vault_types::ChunkId;

use crate::access::{AccessScope, BranchAccess};
use crate::directory::BranchDirectory;
use crate::error::{SyncError, SyncResult};

/// Serves sync requests against the branches of a [`BranchDirectory`].
#[derive(Clone)]
pub struct Responder {
    directory: Arc<dyn BranchDirectory>,
}

impl Responder {
    pub fn new(directory: Arc<dyn BranchDirectory>) -> Self {
        Self { directory }
    }

    /// Handle requests from `reader` until the peer closes the pipe.
    ///
    /// Returns how many requests were answered. A request that cannot be
    /// decoded is answered with an `ERROR` frame and ends the session, since
    /// the rest of the stream can no longer be framed.
    pub async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> SyncResult<usize>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut handled = 0;
        loop {
            let request = match Request::read_from(reader).await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(ProtocolError::Io(e)) => return Err(ProtocolError::Io(e).into()),
                Err(e) => {
                    warn!(error = %e, "undecodable request, closing session");
                    let err = SyncError::from(e);
                    Response::error(err.error_code(), err.to_string())
                        .write_to(writer)
                        .await?;
                    return Ok(handled);
                }
            };
            let response = self.handle(request).await;
            response.write_to(writer).await?;
            handled += 1;
        }
        debug!(handled, "session closed");
        Ok(handled)
    }

    /// Answer one request, turning any failure into an `ERROR` frame.
    pub async fn handle(&self, request: Request) -> Response {
        let opcode = request.opcode();
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                let code = e.error_code();
                if code == ErrorCode::Internal {
                    warn!(%opcode, error = %e, "request failed");
                } else {
                    debug!(%opcode, %code, error = %e, "request rejected");
                }
                Response::error(code, e.to_string())
            }
        }
    }

    /// Answer one request.
    pub async fn dispatch(&self, request: Request) -> SyncResult<Response> {
        match request {
            Request::GetRemoteTip { branch } => {
                let access = self.directory.open(&branch, AccessScope::Read).await?;
                Ok(Response::RemoteTip {
                    header: access.log.tip_header()?,
                })
            }
            Request::HasChunks { branch, ids } => {
                let access = self.directory.open(&branch, AccessScope::Read).await?;
                let mut present = Vec::new();
                for id in ids {
                    if access.store.contains(&id)? {
                        present.push(id);
                    }
                }
                Ok(Response::HasChunks { present })
            }
            Request::GetChunks { branch, ids } => {
                let access = self.directory.open(&branch, AccessScope::Read).await?;
                let mut chunks = Vec::with_capacity(ids.len());
                for id in ids {
                    let data = access.store.get(&id)?;
                    chunks.push(WireChunk { id, data });
                }
                debug!(branch, count = chunks.len(), "serving chunks");
                Ok(Response::Chunks { chunks })
            }
            Request::PutChunks {
                branch,
                expected_revision,
                new_tip,
                message,
                chunks,
            } => {
                let access = self.directory.open(&branch, AccessScope::Write).await?;
                let _guard = access.commit_lock.lock().await;
                let (status, revision) = apply_put(&access, expected_revision, new_tip, message, chunks)?;
                Ok(Response::PutChunks { status, revision })
            }
        }
    }
}

/// Check the revision, commit the chunks and append the log entry. The
/// caller holds the branch's commit lock.
fn apply_put(
    access: &BranchAccess,
    expected: u64,
    new_tip: ChunkId,
    message: String,
    chunks: Vec<WireChunk>,
) -> SyncResult<(PutStatus, u64)> {
    let current = access.log.revision()?;
    if current != expected {
        info!(branch = %access.name, expected, current, "rejecting stale push");
        return Ok((PutStatus::PullRequired, current));
    }

    let count = chunks.len();
    let mut tx = Transaction::begin(&*access.store);
    for chunk in chunks {
        tx.put_chunk(chunk.id, chunk.data)?;
    }
    match CommitRecord::pointer(&tx, &new_tip) {
        Ok(_) => {}
        Err(
            ObjectError::Store(StoreError::NotFound(_))
            | ObjectError::UnexpectedKind { .. }
            | ObjectError::UnknownTag { .. }
            | ObjectError::Untagged(_),
        ) => return Err(SyncError::BadTip(new_tip)),
        Err(e) => return Err(e.into()),
    }
    let written = tx.commit()?;

    match access
        .log
        .compare_and_append(expected, new_tip, message.into_bytes())
    {
        Ok(entry) => {
            info!(
                branch = %access.name,
                revision = entry.revision,
                tip = %new_tip,
                received = count,
                written,
                "accepted push"
            );
            Ok((PutStatus::Ok, entry.revision))
        }
        Err(LogError::RevisionMismatch { actual, .. }) => Ok((PutStatus::PullRequired, actual)),
        Err(e) => Err(e.into()),
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::DenyBranches;
    use crate::directory::InMemoryBranchDirectory;
    use crate::testing::{commit_files, connect};
    use bytes::Bytes;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use vault_crypto::chunk_id;
    use vault_protocol::Opcode;

    #[tokio::test]
    async fn empty_branch_has_empty_tip() {
        let directory = Arc::new(InMemoryBranchDirectory::new());
        let (mut initiator, server) = connect(directory);
        assert_eq!(initiator.remote_tip("main").await.unwrap(), None);
        drop(initiator);
        assert_eq!(server.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn has_and_get_chunks() {
        let directory = Arc::new(InMemoryBranchDirectory::new());
        let main = directory.branch("main").unwrap();
        let tip = commit_files(&main, &[("a.txt", "hello")], "c1");
        let missing = chunk_id(b"nowhere");

        let (mut initiator, _server) = connect(directory.clone());
        let present = initiator.has_chunks("main", &[tip, missing]).await.unwrap();
        assert!(present.contains(&tip));
        assert!(!present.contains(&missing));

        let chunks = initiator.get_chunks("main", &[tip]).await.unwrap();
        assert_eq!(chunks[0].data, directory.store().get(&tip).unwrap());

        let err = initiator.get_chunks("main", &[missing]).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Remote {
                code: ErrorCode::NotFound,
                ..
            }
        ));
        // The session survives a failed request.
        assert!(initiator.remote_tip("main").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn denied_branch_reports_access_denied() {
        let directory = Arc::new(InMemoryBranchDirectory::with_policy(Arc::new(
            DenyBranches::new(["private"]),
        )));
        let (mut initiator, _server) = connect(directory);
        assert!(matches!(
            initiator.remote_tip("private").await,
            Err(SyncError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn put_rejects_tip_that_is_not_a_commit() {
        let directory = Arc::new(InMemoryBranchDirectory::new());
        let (mut initiator, _server) = connect(directory.clone());
        let blob = WireChunk::new(Bytes::from_static(b"\x01raw data"));
        let err = initiator
            .put_chunks("main", 0, blob.id, "bogus", vec![blob.clone()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Remote {
                code: ErrorCode::Malformed,
                ..
            }
        ));
        assert!(!directory.store().contains(&blob.id).unwrap());
        let main = directory.branch("main").unwrap();
        assert_eq!(main.log.revision().unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_opcode_gets_error_frame_and_closes() {
        let directory = Arc::new(InMemoryBranchDirectory::new());
        let responder = Responder::new(directory);
        let (mut client, server) = duplex(1024);
        let task = tokio::spawn(async move {
            let (mut r, mut w) = tokio::io::split(server);
            responder.serve(&mut r, &mut w).await
        });

        client.write_all(&77u32.to_be_bytes()).await.unwrap();
        let response = Response::read_from(&mut client, Opcode::GetRemoteTip)
            .await
            .unwrap();
        assert!(matches!(
            response,
            Response::Error {
                code: ErrorCode::UnknownOpcode,
                ..
            }
        ));
        assert_eq!(task.await.unwrap().unwrap(), 0);
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
