use fstree::{FsError, NodeId, NodeKind, TreeSnapshot, join_location};
use protocol::{
    backup::is_backup_dir,
    data::DataRequest,
    reply::{CHUNK_ACK, CREATE_DONE, END_OF_FILE, FILE_DONE},
};
use storage::storage::Storage;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite},
    net::TcpStream,
};
use utilities::{
    frame::{read_text, write_frame, write_text},
    logger::{debug, info, instrument, tracing},
};

use crate::state::StorageState;

fn desync(e: std::io::Error) -> FsError {
    FsError::PeerUnreachable(e.to_string())
}

async fn expect_reply<S>(stream: &mut S, expected: &str) -> Result<(), FsError>
where
    S: AsyncRead + Unpin,
{
    let reply = read_text(stream).await.map_err(desync)?;
    if reply != expected {
        return Err(FsError::CopyFailed(format!(
            "peer answered {:?} instead of {expected:?}",
            reply.trim()
        )));
    }
    Ok(())
}

/// Snapshot of the subtree being copied, with every file in it read locked
/// until [`SourceClaim::release`].
pub struct SourceClaim {
    snapshot: TreeSnapshot,
    held: Vec<NodeId>,
}

impl SourceClaim {
    /// Takes the snapshot and the read locks under one tree guard. A file
    /// being written makes the whole claim `Busy`. A root leaves its backup
    /// directories behind.
    pub async fn take(state: &StorageState, source_path: &str) -> Result<Self, FsError> {
        let mut tree = state.tree.write().await;
        let id = tree.resolve_path(source_path).ok_or(FsError::NotFound)?;
        let is_root = id == tree.root();
        let tops: Vec<NodeId> = if is_root {
            tree.children(id)
                .into_iter()
                .filter(|child| tree.node(*child).is_some_and(|node| !is_backup_dir(&node.name)))
                .collect()
        } else {
            vec![id]
        };
        if tops.iter().any(|top| tree.has_writer(*top)) {
            return Err(FsError::busy_writing());
        }
        let mut held = Vec::new();
        for top in tops {
            match tree.lock_subtree_read(top) {
                Ok(files) => held.extend(files),
                Err(e) => {
                    for file in held {
                        tree.unlock_read(file);
                    }
                    return Err(e);
                }
            }
        }
        let snapshot = tree.snapshot(id)?;
        let snapshot = if is_root {
            snapshot.without_children(is_backup_dir)
        } else {
            snapshot
        };
        Ok(Self { snapshot, held })
    }

    pub async fn release(self, state: &StorageState) {
        let mut tree = state.tree.write().await;
        for file in self.held {
            tree.unlock_read(file);
        }
    }
}

struct Pending {
    snapshot: TreeSnapshot,
    source_path: String,
    dest_dir: String,
    name: String,
}

/// Connects to the peer at `peer_addrs` and copies the subtree at
/// `source_path` into its `dest_dir` as `name`. The source is claimed first,
/// so a busy subtree leaves the peer untouched.
#[instrument(name = "peer_send_subtree", skip(state))]
pub async fn copy_to_peer(
    state: &StorageState,
    peer_addrs: &str,
    source_path: &str,
    dest_dir: &str,
    name: &str,
) -> Result<usize, FsError> {
    let claim = SourceClaim::take(state, source_path).await?;
    let sent = match TcpStream::connect(peer_addrs).await {
        Ok(mut stream) => {
            let sent = send_claimed(state, &mut stream, &claim, source_path, dest_dir, name).await;
            if let Err(e) = write_text(&mut stream, &DataRequest::Exit.to_string()).await {
                debug!(error = %e, "Peer closed before EXIT");
            }
            sent
        }
        Err(e) => Err(FsError::PeerUnreachable(format!("{peer_addrs}: {e}"))),
    };
    claim.release(state).await;
    sent
}

/// Claims the subtree at `source_path`, streams it and releases it again.
/// Returns the number of nodes sent.
pub async fn send_subtree<S>(
    state: &StorageState,
    stream: &mut S,
    source_path: &str,
    dest_dir: &str,
    name: &str,
) -> Result<usize, FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let claim = SourceClaim::take(state, source_path).await?;
    let sent = send_claimed(state, stream, &claim, source_path, dest_dir, name).await;
    claim.release(state).await;
    sent
}

/// Streams the claimed snapshot, so a directory copied into itself only
/// carries what existed when the copy began.
async fn send_claimed<S>(
    state: &StorageState,
    stream: &mut S,
    claim: &SourceClaim,
    source_path: &str,
    dest_dir: &str,
    name: &str,
) -> Result<usize, FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut pending = vec![Pending {
        snapshot: claim.snapshot.clone(),
        source_path: source_path.to_owned(),
        dest_dir: dest_dir.to_owned(),
        name: name.to_owned(),
    }];
    let mut sent = 0;
    while let Some(item) = pending.pop() {
        match item.snapshot.kind {
            NodeKind::File => send_file(state, stream, &item).await?,
            NodeKind::Directory => {
                let request = DataRequest::CreateDir {
                    dest_dir: item.dest_dir.clone(),
                    name: item.name.clone(),
                    permissions: item.snapshot.permissions,
                };
                write_text(stream, &request.to_string()).await.map_err(desync)?;
                expect_reply(stream, CREATE_DONE).await?;
                let inner = join_location(&item.dest_dir, &item.name);
                for child in item.snapshot.children.into_iter().rev() {
                    pending.push(Pending {
                        source_path: join_location(&item.source_path, &child.name),
                        dest_dir: inner.clone(),
                        name: child.name.clone(),
                        snapshot: child,
                    });
                }
            }
        }
        sent += 1;
    }
    info!(nodes = sent, "Subtree sent to peer");
    Ok(sent)
}

async fn send_file<S>(state: &StorageState, stream: &mut S, item: &Pending) -> Result<(), FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = DataRequest::FileMeta {
        dest_dir: item.dest_dir.clone(),
        name: item.name.clone(),
        permissions: item.snapshot.permissions,
    };
    write_text(stream, &request.to_string()).await.map_err(desync)?;
    expect_reply(stream, CREATE_DONE).await?;
    let mut reader = state.store.read(&item.snapshot.data_location).await?;
    let mut chunk = vec![0u8; state.options.chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let data = &chunk[..read];
        // a chunk equal to the sentinel would end the file early
        let pieces: Vec<&[u8]> = if data == END_OF_FILE.as_bytes() {
            let (head, tail) = data.split_at(1);
            vec![head, tail]
        } else {
            vec![data]
        };
        for piece in pieces {
            write_frame(stream, piece).await.map_err(desync)?;
            expect_reply(stream, CHUNK_ACK).await?;
        }
        total += read as u64;
    }
    write_text(stream, END_OF_FILE).await.map_err(desync)?;
    expect_reply(stream, FILE_DONE).await?;
    debug!(file = %item.source_path, bytes = total, "File sent to peer");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::handler::handle_connection,
        state::tests::test_state,
    };
    use std::sync::Arc;
    use tokio::io::duplex;

    #[tokio::test]
    async fn directory_copies_into_peer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("one/backup_4")).unwrap();
        let source = test_state(dir.path(), "one", &[("a.txt", "hello world"), ("empty.txt", "")]).await;
        let dest = test_state(dir.path(), "two", &[]).await;
        let (mut sender_end, receiver_end) = duplex(64);
        let receiver = tokio::spawn(handle_connection(dest.clone(), receiver_end, "127.0.0.1:5000".parse().unwrap()));
        let sent = send_subtree(&source, &mut sender_end, "/", "/", "one").await.unwrap();
        assert_eq!(sent, 3);
        write_text(&mut sender_end, "EXIT").await.unwrap();
        receiver.await.unwrap().unwrap();
        assert_eq!(std::fs::read(dir.path().join("two/one/a.txt")).unwrap(), b"hello world");
        assert_eq!(std::fs::read(dir.path().join("two/one/empty.txt")).unwrap(), b"");
        assert!(!dir.path().join("two/one/backup_4").exists());
        let tree = dest.tree.read().await;
        let id = tree.resolve_path("/one/a.txt").unwrap();
        assert!(!tree.node(id).unwrap().lock.is_locked());
        assert!(source.lock_for_write("/a.txt").await.is_ok());
    }

    #[tokio::test]
    async fn sentinel_sized_chunk_is_split() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = test_state(dir.path(), "one", &[("tricky.txt", END_OF_FILE)]).await;
        Arc::get_mut(&mut source).unwrap().options.chunk_size = END_OF_FILE.len();
        let dest = test_state(dir.path(), "two", &[]).await;
        let (mut sender_end, receiver_end) = duplex(64);
        tokio::spawn(handle_connection(dest.clone(), receiver_end, "127.0.0.1:5000".parse().unwrap()));
        send_subtree(&source, &mut sender_end, "/tricky.txt", "/", "copy.txt").await.unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("two/copy.txt")).unwrap(),
            END_OF_FILE.as_bytes()
        );
    }

    #[tokio::test]
    async fn existing_name_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let source = test_state(dir.path(), "one", &[("a.txt", "new")]).await;
        let dest = test_state(dir.path(), "two", &[("a.txt", "old")]).await;
        let (mut sender_end, receiver_end) = duplex(64);
        tokio::spawn(handle_connection(dest, receiver_end, "127.0.0.1:5000".parse().unwrap()));
        let result = send_subtree(&source, &mut sender_end, "/a.txt", "/", "a.txt").await;
        assert!(matches!(result, Err(FsError::CopyFailed(_))));
        assert_eq!(std::fs::read(dir.path().join("two/a.txt")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn write_locked_source_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let source = test_state(dir.path(), "one", &[("a.txt", "data")]).await;
        let _held = source.lock_for_write("/a.txt").await.unwrap();
        let (mut sender_end, _receiver_end) = duplex(64);
        let result = send_subtree(&source, &mut sender_end, "/a.txt", "/", "a.txt").await;
        assert!(matches!(result, Err(FsError::Busy(_))));
    }

    #[tokio::test]
    async fn directory_with_a_file_being_written_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("one/docs")).unwrap();
        std::fs::write(dir.path().join("one/docs/a.txt"), "first").unwrap();
        std::fs::write(dir.path().join("one/docs/z.txt"), "last").unwrap();
        let source = test_state(dir.path(), "one", &[]).await;
        let dest = test_state(dir.path(), "two", &[]).await;
        let writing = source.lock_for_write("/docs/z.txt").await.unwrap();
        let (mut sender_end, receiver_end) = duplex(64);
        tokio::spawn(handle_connection(dest.clone(), receiver_end, "127.0.0.1:5000".parse().unwrap()));
        let result = send_subtree(&source, &mut sender_end, "/docs", "/", "docs").await;
        assert!(matches!(result, Err(FsError::Busy(_))));
        assert!(!dir.path().join("two/docs").exists());
        assert!(dest.tree.read().await.resolve_path("/docs").is_none());
        // nothing stays read locked after the refusal
        assert!(source.lock_for_write("/docs/a.txt").await.is_ok());
        source.unlock_write(&writing).await;
    }

    #[tokio::test]
    async fn busy_source_is_reported_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let source = test_state(dir.path(), "one", &[("a.txt", "data")]).await;
        let _held = source.lock_for_write("/a.txt").await.unwrap();
        let result = copy_to_peer(&source, "127.0.0.1:1", "/a.txt", "/", "a.txt").await;
        assert!(matches!(result, Err(FsError::Busy(_))));
        let result = copy_to_peer(&source, "127.0.0.1:1", "/", "/", "one").await;
        assert!(matches!(result, Err(FsError::Busy(_))));
    }
}
