use fstree::{FsError, NodeKind, Permissions, join_location};
use protocol::reply::{CHUNK_ACK, CREATE_DONE, END_OF_FILE, FILE_DONE};
use storage::storage::Storage;
use tokio::io::{AsyncRead, AsyncWrite};
use utilities::{
    frame::{read_frame, write_text},
    logger::{debug, instrument, tracing},
};

use crate::{state::StorageState, structure::create_in};

/// CREATE_DIR from a peer.
pub async fn receive_dir(
    state: &StorageState,
    dest_dir: &str,
    name: &str,
    permissions: Permissions,
) -> Result<(), FsError> {
    create_in(state, dest_dir, name, NodeKind::Directory, permissions).await?;
    Ok(())
}

/// FILE_META from a peer: creates the file, then appends every data frame
/// until the end sentinel while holding the new file's write lock.
#[instrument(name = "peer_receive_file", skip(state, stream, permissions))]
pub async fn receive_file<S>(
    state: &StorageState,
    stream: &mut S,
    dest_dir: &str,
    name: &str,
    permissions: Permissions,
) -> Result<u64, FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    create_in(state, dest_dir, name, NodeKind::File, permissions).await?;
    let path = join_location(dest_dir, name);
    let file = state.lock_for_write_any(&path).await?;
    let received = fill(state, stream, &file.location).await;
    state.unlock_write(&file).await;
    let received = received?;
    write_text(stream, FILE_DONE).await?;
    debug!(bytes = received, "File received from peer");
    Ok(received)
}

async fn fill<S>(state: &StorageState, stream: &mut S, location: &str) -> Result<u64, FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_text(stream, CREATE_DONE).await?;
    let mut received = 0;
    loop {
        let chunk = read_frame(stream).await?;
        if chunk == END_OF_FILE.as_bytes() {
            return Ok(received);
        }
        received += state.store.append(location, &chunk).await?;
        write_text(stream, CHUNK_ACK).await?;
    }
}
