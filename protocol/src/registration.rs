//! Storage server registration: a fixed 24 byte header echoed back by the
//! naming server, followed by one node chain transfer of the whole tree.

use fstree::{FsError, TreeSnapshot};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::node_chain::{TransferStats, receive_snapshot, send_snapshot};

pub const HEADER_LEN: usize = 24;
const IP_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationHeader {
    pub ip: String,
    pub registration_port: u16,
    pub client_port: u16,
}

impl RegistrationHeader {
    pub fn encode(&self) -> Result<[u8; HEADER_LEN], FsError> {
        // the ip keeps at least one trailing NUL
        if self.ip.len() >= IP_LEN {
            return Err(FsError::Malformed(format!("ip {} does not fit the header", self.ip)));
        }
        let mut header = [0u8; HEADER_LEN];
        header[..self.ip.len()].copy_from_slice(self.ip.as_bytes());
        header[IP_LEN..IP_LEN + 4].copy_from_slice(&(self.registration_port as i32).to_le_bytes());
        header[IP_LEN + 4..].copy_from_slice(&(self.client_port as i32).to_le_bytes());
        Ok(header)
    }

    pub fn decode(header: &[u8; HEADER_LEN]) -> Result<Self, FsError> {
        let ip_end = header[..IP_LEN].iter().position(|byte| *byte == 0).unwrap_or(IP_LEN);
        let ip = std::str::from_utf8(&header[..ip_end])
            .map_err(|e| FsError::ProtocolDesync(format!("ip is not utf8: {e}")))?
            .to_owned();
        let port = |raw: &[u8]| -> Result<u16, FsError> {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(raw);
            let value = i32::from_le_bytes(bytes);
            u16::try_from(value).map_err(|_| FsError::ProtocolDesync(format!("invalid port {value}")))
        };
        Ok(Self {
            ip,
            registration_port: port(&header[IP_LEN..IP_LEN + 4])?,
            client_port: port(&header[IP_LEN + 4..])?,
        })
    }
}

/// Storage server side: announce ourselves and ship the tree.
pub async fn register<S>(
    stream: &mut S,
    header: &RegistrationHeader,
    tree: &TreeSnapshot,
) -> Result<TransferStats, FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let encoded = header.encode()?;
    stream.write_all(&encoded).await?;
    stream.flush().await?;
    let mut echo = [0u8; HEADER_LEN];
    stream.read_exact(&mut echo).await?;
    if echo != encoded {
        return Err(FsError::ProtocolDesync("registration header was not echoed".to_string()));
    }
    send_snapshot(stream, tree).await
}

/// Naming server side of [`register`].
pub async fn accept_registration<S>(stream: &mut S) -> Result<(RegistrationHeader, TreeSnapshot), FsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut raw = [0u8; HEADER_LEN];
    stream.read_exact(&mut raw).await?;
    let header = RegistrationHeader::decode(&raw)?;
    stream.write_all(&raw).await?;
    stream.flush().await?;
    let (tree, _) = receive_snapshot(stream).await?;
    Ok((header, tree))
}
