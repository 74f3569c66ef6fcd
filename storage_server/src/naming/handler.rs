use fstree::FsError;
use protocol::{
    command::{ServerInfo, StorageCommand},
    reply::{COPY_ACK, COPY_DONE, CREATE_DONE, DELETE_DONE, error_reply},
};
use tokio::io::{AsyncRead, AsyncWrite};
use utilities::{
    frame::{read_text, read_text_opt, write_text},
    logger::{error, info, instrument, trace, warn, tracing},
    result::Result,
};

use crate::{
    peer::sender::copy_to_peer,
    state::StorageState,
    structure::{create_path, delete_path},
};

pub enum Next {
    Continue,
    Exit,
}

/// Serves naming server commands until the channel closes or EXIT.
pub async fn serve_commands<S>(state: &StorageState, stream: &mut S) -> Result<Next>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(line) = read_text_opt(stream).await? {
        trace!(command = %line, "Command from naming server");
        let command = match line.parse::<StorageCommand>() {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Unparsable naming server command");
                write_text(stream, &error_reply(&e)).await?;
                continue;
            }
        };
        let reply = match command {
            StorageCommand::Create { kind, path, .. } => match create_path(state, &path, kind).await {
                Ok(_) => CREATE_DONE.to_owned(),
                Err(e) => error_reply(&e),
            },
            StorageCommand::Delete { path } => match delete_path(state, &path).await {
                Ok(removed) => {
                    info!(%path, removed, "Deleted");
                    DELETE_DONE.to_owned()
                }
                Err(e) => error_reply(&e),
            },
            StorageCommand::Copy {
                source,
                dest_dir,
                name,
            } => handle_copy(state, stream, &source, &dest_dir, &name).await?,
            StorageCommand::Exit => return Ok(Next::Exit),
        };
        write_text(stream, &reply).await?;
    }
    Ok(Next::Continue)
}

/// Acknowledges the COPY, reads the peer to copy into and streams the
/// subtree there. The returned text is the final reply.
#[instrument(name = "naming_handle_copy", skip(state, stream))]
async fn handle_copy<S>(state: &StorageState, stream: &mut S, source: &str, dest_dir: &str, name: &str) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_text(stream, COPY_ACK).await?;
    let info = read_text(stream).await?;
    let peer = match info.parse::<ServerInfo>() {
        Ok(peer) => peer,
        Err(e) => return Ok(error_reply(&e)),
    };
    match copy_to_peer(state, &peer.addrs(), source, dest_dir, name).await {
        Ok(nodes) => {
            info!(nodes, peer = %peer.addrs(), "Copy done");
            Ok(COPY_DONE.to_owned())
        }
        Err(e @ FsError::Busy(_)) => {
            info!(error = %e, "Copy source busy");
            Ok(error_reply(&e))
        }
        Err(e) => {
            error!(error = %e, "Copy failed");
            let reply = match e {
                FsError::NotFound | FsError::CopyFailed(_) => e,
                other => FsError::CopyFailed(other.to_string()),
            };
            Ok(error_reply(&reply))
        }
    }
}
