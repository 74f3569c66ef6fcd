use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use storage::{file_storage::FileStorage, storage::Storage};
use tokio::{net::TcpListener, task::JoinHandle};
use utilities::{
    logger::{Instrument, Level, Span, error, info, span},
    result::Result,
};

use crate::{client::handler::handle_connection, naming, state::StorageState};

#[derive(Debug, Clone)]
pub struct StorageServerOptions {
    pub naming_addrs: String,
    pub naming_ack_addrs: Option<String>,
    pub advertise_ip: String,
    pub client_addrs: String,
    pub storage_path: PathBuf,
    pub async_write_threshold: u64,
    pub chunk_size: usize,
    pub reconnect_retries: u8,
    pub reconnect_delay: Duration,
}

/// A running storage server: registered with the naming server and serving
/// its client listener.
pub struct StorageNode {
    state: Arc<StorageState>,
    client_addrs: SocketAddr,
    client_task: JoinHandle<Result<()>>,
    naming_task: JoinHandle<Result<()>>,
}

impl StorageNode {
    /// Scans the storage directory, binds the client listener and registers.
    /// Returns once the naming server holds our tree.
    pub async fn start(options: StorageServerOptions) -> Result<Self> {
        let store = FileStorage::new(&options.storage_path).await?;
        let tree = store.scan().await?;
        info!(root = %tree.root_name(), nodes = tree.len(), "Scanned storage directory");
        let listener = TcpListener::bind(&options.client_addrs).await?;
        let client_addrs = listener.local_addr()?;
        let state = StorageState::new(tree, store, options, client_addrs.port());
        let stream = naming::service::connect_and_register(&state).await?;
        let client_task = tokio::spawn(
            accept_clients(listener, state.clone()).instrument(span!(Level::INFO, "client_acceptor")),
        );
        let naming_task = tokio::spawn(
            naming::service::run(state.clone(), stream).instrument(span!(Level::INFO, "naming_channel")),
        );
        Ok(Self {
            state,
            client_addrs,
            client_task,
            naming_task,
        })
    }

    pub fn client_addrs(&self) -> SocketAddr {
        self.client_addrs
    }

    pub fn state(&self) -> Arc<StorageState> {
        self.state.clone()
    }

    /// Runs until the naming channel gives up or the listener fails.
    pub async fn wait(self) -> Result<()> {
        tokio::select! {
            result = self.client_task => result??,
            result = self.naming_task => result??,
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.client_task.abort();
        self.naming_task.abort();
    }
}

async fn accept_clients(listener: TcpListener, state: Arc<StorageState>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(
            async move {
                if let Err(e) = handle_connection(state, stream, peer).await {
                    error!(error = %e, "Error while serving client connection");
                }
            }
            .instrument(Span::current()),
        );
    }
}
