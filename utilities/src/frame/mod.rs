//! Length prefixed frames used by every text channel between the servers.
//!
//! A frame is a `u32` little endian length followed by that many bytes. One
//! command or one reply always travels as exactly one frame.

use std::io::{Error, ErrorKind};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame, anything larger is treated as a corrupt stream.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

pub async fn write_frame(stream: &mut (impl AsyncWrite + Unpin), payload: &[u8]) -> std::io::Result<()> {
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds limit", payload.len()),
        ));
    }
    let mut buf = Vec::with_capacity(payload.len() + 4);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    stream.write_all(&buf).await?;
    stream.flush().await
}

pub async fn read_frame(stream: &mut (impl AsyncRead + Unpin)) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u32_le().await?;
    read_payload(stream, len).await
}

/// Like [`read_frame`] but returns `None` when the peer closed the stream
/// cleanly before the next frame started.
pub async fn read_frame_opt(stream: &mut (impl AsyncRead + Unpin)) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    let first = stream.read(&mut len_buf).await?;
    if first == 0 {
        return Ok(None);
    }
    stream.read_exact(&mut len_buf[first..]).await?;
    read_payload(stream, u32::from_le_bytes(len_buf))
        .await
        .map(Some)
}

async fn read_payload(stream: &mut (impl AsyncRead + Unpin), len: u32) -> std::io::Result<Vec<u8>> {
    if len > MAX_FRAME_LEN {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}

pub async fn write_text(stream: &mut (impl AsyncWrite + Unpin), text: &str) -> std::io::Result<()> {
    write_frame(stream, text.as_bytes()).await
}

pub async fn read_text(stream: &mut (impl AsyncRead + Unpin)) -> std::io::Result<String> {
    let payload = read_frame(stream).await?;
    String::from_utf8(payload).map_err(|e| Error::new(ErrorKind::InvalidData, e))
}

pub async fn read_text_opt(stream: &mut (impl AsyncRead + Unpin)) -> std::io::Result<Option<String>> {
    match read_frame_opt(stream).await? {
        Some(payload) => String::from_utf8(payload)
            .map(Some)
            .map_err(|e| Error::new(ErrorKind::InvalidData, e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn frame_reader_test() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&5u32.to_le_bytes());
        buf.extend_from_slice(b"READ ");
        buf.extend_from_slice(&0u32.to_le_bytes());
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).await.unwrap(), b"READ ");
        assert!(read_frame(&mut cursor).await.unwrap().is_empty());
        assert!(read_frame_opt(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn text_frames_over_duplex() {
        let (mut left, mut right) = tokio::io::duplex(64);
        write_text(&mut left, "LIST /home").await.unwrap();
        write_text(&mut left, "EXIT").await.unwrap();
        assert_eq!(read_text(&mut right).await.unwrap(), "LIST /home");
        assert_eq!(read_text(&mut right).await.unwrap(), "EXIT");
        drop(left);
        assert!(read_text_opt(&mut right).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let mut cursor = Cursor::new((MAX_FRAME_LEN + 1).to_le_bytes().to_vec());
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(buf);
        assert!(read_frame_opt(&mut cursor).await.is_err());
    }
}
