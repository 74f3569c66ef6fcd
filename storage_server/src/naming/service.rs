use std::sync::Arc;

use protocol::registration::{RegistrationHeader, register};
use tokio::net::TcpStream;
use utilities::{
    logger::{error, info, instrument, warn, tracing},
    result::Result,
    retry_policy::retry_with_backoff,
};

use super::handler::{Next, serve_commands};
use crate::state::StorageState;

/// Connects to the naming server and ships the current tree. The port of
/// this connection is what the naming server knows us by.
#[instrument(name = "naming_register", skip(state))]
pub async fn connect_and_register(state: &StorageState) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(&state.options.naming_addrs).await?;
    let header = RegistrationHeader {
        ip: state.options.advertise_ip.clone(),
        registration_port: stream.local_addr()?.port(),
        client_port: state.client_port,
    };
    let snapshot = {
        let tree = state.tree.read().await;
        tree.snapshot(tree.root())?
    };
    let stats = register(&mut stream, &header, &snapshot).await?;
    info!(
        nodes = stats.nodes,
        round_trips = stats.round_trips,
        "Registered with naming server"
    );
    Ok(stream)
}

/// Keeps the naming channel up: serves commands and registers again
/// whenever the naming server drops the connection.
pub async fn run(state: Arc<StorageState>, first: TcpStream) -> Result<()> {
    let mut stream = first;
    loop {
        match serve_commands(&state, &mut stream).await {
            Ok(Next::Exit) => {
                info!("Naming server asked us to exit");
                return Ok(());
            }
            Ok(Next::Continue) => warn!("Naming server closed the channel, registering again"),
            Err(e) => error!(error = %e, "Naming channel failed, registering again"),
        }
        stream = retry_with_backoff(
            || connect_and_register(&state),
            state.options.reconnect_retries,
            state.options.reconnect_delay,
        )
        .await?;
    }
}
