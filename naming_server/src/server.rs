use std::{net::SocketAddr, sync::Arc, time::Duration};

use fstree::FsTree;
use protocol::registration::accept_registration;
use tokio::net::{TcpListener, TcpStream};
use utilities::{
    logger::{Instrument, Level, Span, error, info, instrument, span, tracing},
    result::Result,
};

use crate::{
    registry::{StorageRegistry, link::ServerLink, server::ServerIdentity},
    replication::ReplicationManager,
    router::CommandRouter,
    write_tracker::{TcpClientNotifier, WriteTracker, serve_acks},
};

#[derive(Debug, Clone)]
pub struct NamingServerOptions {
    pub client_addrs: String,
    pub storage_addrs: String,
    pub ack_addrs: String,
    pub registry_buckets: usize,
    pub cache_capacity: usize,
    pub replication_min_servers: usize,
    pub write_check_interval: Duration,
    pub write_abandon_after: Duration,
}

pub struct NamingServer {
    options: NamingServerOptions,
    client_listener: TcpListener,
    storage_listener: TcpListener,
    ack_listener: TcpListener,
    registry: Arc<StorageRegistry>,
}

impl NamingServer {
    pub async fn bind(options: NamingServerOptions) -> Result<Self> {
        let client_listener = TcpListener::bind(&options.client_addrs).await?;
        let storage_listener = TcpListener::bind(&options.storage_addrs).await?;
        let ack_listener = TcpListener::bind(&options.ack_addrs).await?;
        let registry = Arc::new(StorageRegistry::new(
            options.registry_buckets,
            options.cache_capacity,
        ));
        Ok(Self {
            options,
            client_listener,
            storage_listener,
            ack_listener,
            registry,
        })
    }

    pub fn client_addrs(&self) -> Result<SocketAddr> {
        Ok(self.client_listener.local_addr()?)
    }

    pub fn storage_addrs(&self) -> Result<SocketAddr> {
        Ok(self.storage_listener.local_addr()?)
    }

    pub fn ack_addrs(&self) -> Result<SocketAddr> {
        Ok(self.ack_listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<StorageRegistry> {
        self.registry.clone()
    }

    /// Starts replication and write tracking, then accepts until a listener fails.
    pub async fn serve(self) -> Result<()> {
        ReplicationManager::new(self.registry.clone(), self.options.replication_min_servers).start();
        let tracker = WriteTracker::start(
            Arc::new(TcpClientNotifier::new(Duration::from_secs(2))),
            self.options.write_check_interval,
            self.options.write_abandon_after,
        );
        let registry = self.registry.clone();
        let storage_listener = self.storage_listener;
        let storage_task = tokio::spawn(
            async move { accept_storage_servers(storage_listener, registry).await }
                .instrument(span!(Level::INFO, "storage_acceptor")),
        );
        let ack_task = tokio::spawn(
            serve_acks(self.ack_listener, tracker).instrument(span!(Level::INFO, "ack_acceptor")),
        );
        let router = CommandRouter::new(self.registry.clone());
        let client_task = tokio::spawn(
            accept_clients(self.client_listener, router).instrument(span!(Level::INFO, "client_acceptor")),
        );
        tokio::select! {
            result = storage_task => result??,
            result = ack_task => result??,
            result = client_task => result??,
        }
        Ok(())
    }
}

async fn accept_clients(listener: TcpListener, router: CommandRouter) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "Client connected");
        let router = router.clone();
        tokio::spawn(
            async move {
                if let Err(e) = router.handle_client(stream, peer.to_string()).await {
                    error!(error = %e, "Error while serving client");
                }
            }
            .instrument(Span::current()),
        );
    }
}

async fn accept_storage_servers(listener: TcpListener, registry: Arc<StorageRegistry>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        tokio::spawn(
            async move {
                if let Err(e) = register_storage_server(stream, registry).await {
                    error!(error = %e, "Storage server registration failed");
                }
            }
            .instrument(span!(Level::INFO, "storage_registration", %peer)),
        );
    }
}

#[instrument(name = "register_storage_server", skip(stream, registry))]
async fn register_storage_server(mut stream: TcpStream, registry: Arc<StorageRegistry>) -> Result<()> {
    let (header, snapshot) = accept_registration(&mut stream).await?;
    let tree = FsTree::from_snapshot(&snapshot)?;
    info!(
        ip = %header.ip,
        client_port = header.client_port,
        nodes = tree.len(),
        root = %tree.root_name(),
        "Received storage server tree"
    );
    let label = format!("{}:{}", header.ip, header.registration_port);
    let link = ServerLink::spawn(stream, label, registry.membership());
    let identity = ServerIdentity {
        ip: header.ip,
        registration_port: header.registration_port,
        client_port: header.client_port,
    };
    registry.register(identity, tree, link).await;
    Ok(())
}
