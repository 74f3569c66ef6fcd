use storage_server::{config::CONFIG, server::StorageNode};
use utilities::{
    logger::{error, info, init_logger},
    result::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _gaurd = init_logger(
        "StorageServer",
        &CONFIG.node_id,
        &CONFIG.log_level,
        &CONFIG.log_base,
        CONFIG.apm_endpoint.as_deref(),
    )?;
    info!(naming = %CONFIG.naming_addrs, path = %CONFIG.storage_path, "Starting storage server");
    let node = match StorageNode::start(CONFIG.options()).await {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "Could not start storage server hence shutting down");
            return Err(e);
        }
    };
    info!(client = %node.client_addrs(), "Storage server ready");
    node.wait().await
}
