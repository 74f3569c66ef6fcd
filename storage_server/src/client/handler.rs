use std::{net::SocketAddr, sync::Arc};

use fstree::{FsError, Permissions};
use protocol::{
    data::{DataRequest, WriteHeader, file_size_reply},
    reply::{
        CHUNK_ACK, CREATE_DONE, END_OF_FILE, END_STREAM, READY_TO_RECEIVE, READY_TO_WRITE, START_STREAM, WRITE_ACCEPTED,
        error_reply,
    },
};
use storage::storage::Storage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use utilities::{
    frame::{read_frame, read_text, read_text_opt, write_frame, write_text},
    logger::{debug, info, instrument, trace, tracing},
    result::Result,
};

use super::writer::{WriteOrigin, spawn_flush, write_now};
use crate::{
    peer::receiver::{receive_dir, receive_file},
    state::{LockedFile, StorageState},
};

/// Serves one connection on the client listener until EXIT or close.
#[instrument(name = "client_connection", skip(state, stream))]
pub async fn handle_connection<S>(state: Arc<StorageState>, mut stream: S, peer: SocketAddr) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client_id = state.next_client_id();
    trace!(client_id, "Client connected");
    while let Some(line) = read_text_opt(&mut stream).await? {
        trace!(request = %line, "Data request");
        let request = match line.parse::<DataRequest>() {
            Ok(request) => request,
            Err(e) => {
                write_text(&mut stream, &error_reply(&e)).await?;
                continue;
            }
        };
        let outcome = match request {
            DataRequest::Read { path } => read(&state, &mut stream, &path).await,
            DataRequest::Stream { path } => stream_file(&state, &mut stream, &path).await,
            DataRequest::Meta { path } => meta(&state, &path).await,
            DataRequest::Write { path, sync } => {
                let origin = WriteOrigin {
                    client_id,
                    client_ip: peer.ip().to_string(),
                    ack_port: 0,
                };
                write(&state, &mut stream, &path, sync, origin).await
            }
            DataRequest::FileMeta {
                dest_dir,
                name,
                permissions,
            } => receive_file(&state, &mut stream, &dest_dir, &name, permissions)
                .await
                .map(|_| None),
            DataRequest::CreateDir {
                dest_dir,
                name,
                permissions,
            } => receive_dir(&state, &dest_dir, &name, permissions)
                .await
                .map(|_| Some(CREATE_DONE.to_owned())),
            DataRequest::Exit => break,
        };
        match outcome {
            Ok(Some(reply)) => write_text(&mut stream, &reply).await?,
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "Request refused");
                write_text(&mut stream, &error_reply(&e)).await?;
            }
        }
    }
    info!("Client connection closed");
    Ok(())
}

/// Copies the locked file to the stream one frame per chunk.
async fn send_chunks<S>(state: &StorageState, stream: &mut S, file: &LockedFile) -> std::result::Result<u64, FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = state.store.read(&file.location).await?;
    let mut chunk = vec![0u8; state.options.chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Ok(total);
        }
        write_frame(stream, &chunk[..read]).await?;
        total += read as u64;
    }
}

#[instrument(name = "client_read", skip(state, stream))]
async fn read<S>(state: &StorageState, stream: &mut S, path: &str) -> std::result::Result<Option<String>, FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let file = state.lock_for_read(path, Permissions::READ).await?;
    let result = async {
        let size = state.store.size(&file.location).await?;
        write_text(stream, &file_size_reply(size)).await?;
        send_chunks(state, stream, &file).await?;
        write_text(stream, END_OF_FILE).await?;
        Ok::<u64, FsError>(size)
    }
    .await;
    state.unlock_read(&file).await;
    let size = result?;
    debug!(bytes = size, "File read");
    Ok(None)
}

#[instrument(name = "client_stream", skip(state, stream))]
async fn stream_file<S>(state: &StorageState, stream: &mut S, path: &str) -> std::result::Result<Option<String>, FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let file = state.lock_for_read(path, Permissions::READ).await?;
    let result = async {
        write_text(stream, START_STREAM).await?;
        let sent = send_chunks(state, stream, &file).await?;
        write_text(stream, END_STREAM).await?;
        Ok::<u64, FsError>(sent)
    }
    .await;
    state.unlock_read(&file).await;
    result?;
    Ok(None)
}

async fn meta(state: &StorageState, path: &str) -> std::result::Result<Option<String>, FsError> {
    let (name, kind, permissions, location) = {
        let tree = state.tree.read().await;
        let id = tree.resolve_path(path).ok_or(FsError::NotFound)?;
        let node = tree.node(id).ok_or(FsError::NotFound)?;
        (node.name.clone(), node.kind, node.permissions, node.data_location.clone())
    };
    let size = state.store.size(&location).await?;
    Ok(Some(format!(
        "File Metadata:\nName: {name}\nType: {kind}\nSize: {size} bytes\nPermissions: {permissions}\n"
    )))
}

/// WRITE handshake, then either an immediate append or a hand-off to the
/// flusher. The write lock is held from the first reply until the data is
/// on disk.
#[instrument(name = "client_write", skip(state, stream, origin))]
async fn write<S>(
    state: &Arc<StorageState>,
    stream: &mut S,
    path: &str,
    sync: bool,
    mut origin: WriteOrigin,
) -> std::result::Result<Option<String>, FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let file = state.lock_for_write(path).await?;
    let received = async {
        write_text(stream, READY_TO_WRITE).await?;
        let header: WriteHeader = read_text(stream).await?.parse()?;
        write_text(stream, READY_TO_RECEIVE).await?;
        let mut data = Vec::with_capacity(header.file_size.min(1 << 20) as usize);
        while (data.len() as u64) < header.file_size {
            let chunk = read_frame(stream).await?;
            data.extend_from_slice(&chunk);
            write_text(stream, CHUNK_ACK).await?;
        }
        Ok::<(WriteHeader, Vec<u8>), FsError>((header, data))
    }
    .await;
    let (header, data) = match received {
        Ok(received) => received,
        Err(e) => {
            state.unlock_write(&file).await;
            return Err(e);
        }
    };
    if sync || header.file_size < state.options.async_write_threshold {
        return Ok(Some(write_now(state, &file, &data).await));
    }
    origin.ack_port = header.ack_port;
    spawn_flush(state.clone(), file, data, origin);
    Ok(Some(WRITE_ACCEPTED.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use protocol::{
        data::parse_file_size_reply,
        reply::{parse_error_reply, wrote_reply},
    };
    use std::time::Duration;
    use tokio::io::{DuplexStream, duplex};

    fn connect(state: Arc<StorageState>) -> DuplexStream {
        let (client, server) = duplex(1024);
        tokio::spawn(handle_connection(state, server, "127.0.0.1:7000".parse().unwrap()));
        client
    }

    async fn read_until(client: &mut DuplexStream, end: &str) -> Vec<u8> {
        let mut data = Vec::new();
        loop {
            let frame = read_frame(client).await.unwrap();
            if frame == end.as_bytes() {
                return data;
            }
            data.extend_from_slice(&frame);
        }
    }

    async fn send_write(client: &mut DuplexStream, request: &str, payload: &[u8]) -> String {
        write_text(client, request).await.unwrap();
        assert_eq!(read_text(client).await.unwrap(), READY_TO_WRITE);
        let header = WriteHeader {
            file_size: payload.len() as u64,
            ack_port: 9999,
        };
        write_text(client, &header.to_string()).await.unwrap();
        assert_eq!(read_text(client).await.unwrap(), READY_TO_RECEIVE);
        for chunk in payload.chunks(3) {
            write_frame(client, chunk).await.unwrap();
            assert_eq!(read_text(client).await.unwrap(), CHUNK_ACK);
        }
        read_text(client).await.unwrap()
    }

    #[tokio::test]
    async fn read_and_stream_return_content() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), "home", &[("song.txt", "la la la la")]).await;
        let mut client = connect(state.clone());
        write_text(&mut client, "READ /song.txt").await.unwrap();
        let size = parse_file_size_reply(&read_text(&mut client).await.unwrap());
        assert_eq!(size, Some(11));
        assert_eq!(read_until(&mut client, END_OF_FILE).await, b"la la la la");
        write_text(&mut client, "STREAM /home/song.txt").await.unwrap();
        assert_eq!(read_text(&mut client).await.unwrap(), START_STREAM);
        assert_eq!(read_until(&mut client, END_STREAM).await, b"la la la la");
        write_text(&mut client, "READ /").await.unwrap();
        let reply = read_text(&mut client).await.unwrap();
        assert_eq!(parse_error_reply(&reply).unwrap().0, 51);
        assert!(state.lock_for_write("/song.txt").await.is_ok());
    }

    #[tokio::test]
    async fn meta_describes_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), "home", &[("a.txt", "abc")]).await;
        let mut client = connect(state);
        write_text(&mut client, "META /a.txt").await.unwrap();
        let reply = read_text(&mut client).await.unwrap();
        assert!(reply.starts_with("File Metadata:\nName: a.txt\nType: File\nSize: 3 bytes\n"));
        write_text(&mut client, "META /zzz").await.unwrap();
        assert_eq!(parse_error_reply(&read_text(&mut client).await.unwrap()).unwrap().0, 404);
    }

    #[tokio::test]
    async fn small_write_is_synchronous() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), "home", &[("a.txt", "abc")]).await;
        let mut client = connect(state.clone());
        let reply = send_write(&mut client, "WRITE /a.txt", b"defg").await;
        assert_eq!(reply, wrote_reply(4));
        assert_eq!(std::fs::read(dir.path().join("home/a.txt")).unwrap(), b"abcdefg");
        let reply = send_write(&mut client, "WRITE /a.txt --SYNC", b"0123456789abcdef").await;
        assert_eq!(reply, wrote_reply(16));
        assert!(state.lock_for_write("/a.txt").await.is_ok());
    }

    #[tokio::test]
    async fn large_write_is_flushed_later() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), "home", &[("log.txt", "")]).await;
        let mut client = connect(state.clone());
        let reply = send_write(&mut client, "WRITE /log.txt", b"0123456789abcdef").await;
        assert_eq!(reply, WRITE_ACCEPTED);
        let path = dir.path().join("home/log.txt");
        for _ in 0..100 {
            if std::fs::read(&path).unwrap().len() == 16 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"0123456789abcdef");
    }

    #[tokio::test]
    async fn conflicting_and_malformed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), "home", &[("a.txt", "abc")]).await;
        let reader = state.lock_for_read("/a.txt", Permissions::READ).await.unwrap();
        let mut client = connect(state.clone());
        write_text(&mut client, "WRITE /a.txt").await.unwrap();
        assert_eq!(parse_error_reply(&read_text(&mut client).await.unwrap()).unwrap().0, 52);
        state.unlock_read(&reader).await;
        write_text(&mut client, "WRITE /a.txt").await.unwrap();
        assert_eq!(read_text(&mut client).await.unwrap(), READY_TO_WRITE);
        write_text(&mut client, "SIZE=4").await.unwrap();
        assert_eq!(parse_error_reply(&read_text(&mut client).await.unwrap()).unwrap().0, 46);
        assert!(state.lock_for_write("/a.txt").await.is_ok());
    }
}
