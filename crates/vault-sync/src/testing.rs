//! Helpers shared by the sync tests.

use std::sync::Arc;

use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use vault_object::{ChunkConfig, CommitRecord, TreeAccessor};
use vault_store::Transaction;
use vault_types::ChunkId;

use crate::access::BranchAccess;
use crate::directory::BranchDirectory;
use crate::error::SyncResult;
use crate::initiator::Initiator;
use crate::responder::Responder;

pub type TestInitiator = Initiator<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Start a responder on one end of an in-memory pipe.
pub fn connect(directory: Arc<dyn BranchDirectory>) -> (TestInitiator, JoinHandle<SyncResult<usize>>) {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let responder = Responder::new(directory);
    let task = tokio::spawn(async move {
        let (mut reader, mut writer) = tokio::io::split(server);
        responder.serve(&mut reader, &mut writer).await
    });
    let (reader, writer) = tokio::io::split(client);
    (Initiator::new(reader, writer), task)
}

/// Commit `files` on top of the branch head (replacing listed paths,
/// keeping the rest) and append it to the branch log.
pub fn commit_files(access: &BranchAccess, files: &[(&str, &str)], message: &str) -> ChunkId {
    let head = access.log.head().unwrap().map(|e| e.entry_id);
    let mut tx = Transaction::begin(&*access.store);
    let (mut tree, parents) = match head {
        Some(id) => {
            let record = CommitRecord::read(&tx, &id).unwrap();
            let tree = TreeAccessor::open(&tx, &record.tree).unwrap();
            (tree, vec![CommitRecord::pointer(&tx, &id).unwrap()])
        }
        None => (TreeAccessor::empty(), Vec::new()),
    };
    for (path, data) in files {
        tree.put_file(&mut tx, path, data.as_bytes(), &ChunkConfig::default())
            .unwrap();
    }
    let root = tree.build(&mut tx).unwrap();
    let commit = CommitRecord::new(root, parents, message).write(&mut tx).unwrap();
    tx.commit().unwrap();
    access.log.append(commit.id, message.as_bytes().to_vec()).unwrap();
    commit.id
}

/// Read a file from the branch head.
pub fn read_head_file(access: &BranchAccess, path: &str) -> Option<String> {
    let head = access.log.head().unwrap()?.entry_id;
    let record = CommitRecord::read(&*access.store, &head).unwrap();
    let tree = TreeAccessor::open(&*access.store, &record.tree).unwrap();
    tree.get(&*access.store, path).unwrap()?;
    Some(String::from_utf8(tree.read_file(&*access.store, path).unwrap()).unwrap())
}
