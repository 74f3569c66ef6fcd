use naming_server::{config::CONFIG, server::NamingServer};
use utilities::{
    logger::{error, info, init_logger},
    result::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _gaurd = init_logger(
        "NamingServer",
        &CONFIG.id,
        &CONFIG.log_level,
        &CONFIG.log_base,
        CONFIG.apm_endpoint.as_deref(),
    )?;
    let options = CONFIG.options();
    info!(client = %options.client_addrs, storage = %options.storage_addrs, ack = %options.ack_addrs, "Starting naming server");
    let server = match NamingServer::bind(options).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Could not bind listeners hence shutting down");
            return Err(e);
        }
    };
    server.serve().await
}
