use std::sync::Arc;

use protocol::{
    ack::{AckStatus, WriteAck},
    reply::{error_reply, wrote_reply},
};
use storage::storage::Storage;
use utilities::{
    frame::write_text,
    logger::{Instrument, Level, error, info, span, warn},
    result::Result,
    tcp_pool::TcpPool,
};

use crate::state::{LockedFile, StorageState};

/// Who asked for a write and where its notices go.
#[derive(Debug, Clone)]
pub struct WriteOrigin {
    pub client_id: u64,
    pub client_ip: String,
    pub ack_port: u16,
}

/// Appends under the already held write lock and releases it.
pub async fn write_now(state: &StorageState, file: &LockedFile, data: &[u8]) -> String {
    let written = state.store.append(&file.location, data).await;
    state.unlock_write(file).await;
    match written {
        Ok(bytes) => wrote_reply(bytes),
        Err(e) => error_reply(&e),
    }
}

async fn send_ack(state: &StorageState, ack: &WriteAck) -> Result<()> {
    let Some(addrs) = state.options.naming_ack_addrs.as_deref() else {
        return Ok(());
    };
    let mut stream = TcpPool::new().get_connection(addrs).await?;
    write_text(&mut stream, &ack.to_string()).await?;
    Ok(())
}

/// Flushes a large write off the client's request path, reporting start and
/// completion to the naming server.
pub fn spawn_flush(state: Arc<StorageState>, file: LockedFile, data: Vec<u8>, origin: WriteOrigin) {
    let span = span!(Level::INFO, "async_write", file = %file.name, client = origin.client_id);
    tokio::spawn(
        async move {
            let mut ack = WriteAck {
                status: AckStatus::Start,
                client_id: origin.client_id,
                client_ip: origin.client_ip,
                client_port: origin.ack_port,
                file: file.name.clone(),
                message: "Write operation started for file".to_string(),
            };
            if let Err(e) = send_ack(&state, &ack).await {
                warn!(error = %e, "Could not report write start");
            }
            let written = state.store.append(&file.location, &data).await;
            state.unlock_write(&file).await;
            match written {
                Ok(bytes) => {
                    info!(bytes, "Asynchronous write flushed");
                    ack.status = AckStatus::End;
                    ack.message = "Write operation completed successfully for file".to_string();
                    if let Err(e) = send_ack(&state, &ack).await {
                        warn!(error = %e, "Could not report write completion");
                    }
                }
                Err(e) => error!(error = %e, "Asynchronous write failed"),
            }
        }
        .instrument(span),
    );
}
