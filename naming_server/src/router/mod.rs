//! Per-client command loop of the naming server.
//!
//! Path resolution is answered from the registry directly. Structural
//! commands are forwarded over the owning storage server's link and, once
//! that server confirms, applied to the shadow tree.

mod listing;
mod structural;

pub(crate) use structural::run_copy;

use std::sync::Arc;

use fstree::FsError;
use protocol::{
    command::{AccessKind, ClientCommand},
    reply::{EXITING, error_reply, locate_reply},
};
use tokio::io::{AsyncRead, AsyncWrite};
use utilities::{
    frame::{read_text_opt, write_text},
    logger::{debug, info, instrument, trace, tracing},
    result::Result,
};

use crate::registry::StorageRegistry;

#[derive(Clone)]
pub struct CommandRouter {
    registry: Arc<StorageRegistry>,
}

impl CommandRouter {
    pub fn new(registry: Arc<StorageRegistry>) -> Self {
        Self { registry }
    }

    /// Serves one client until it sends EXIT or disconnects.
    #[instrument(name = "router_handle_client", skip(self, stream))]
    pub async fn handle_client<S>(&self, mut stream: S, client: String) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(line) = read_text_opt(&mut stream).await? {
            trace!(command = %line, "Received client command");
            let command = match line.parse::<ClientCommand>() {
                Ok(command) => command,
                Err(e) => {
                    debug!(error = %e, "Rejected client command");
                    write_text(&mut stream, &error_reply(&e)).await?;
                    continue;
                }
            };
            if command == ClientCommand::Exit {
                write_text(&mut stream, EXITING).await?;
                break;
            }
            let reply = self.dispatch(command).await;
            write_text(&mut stream, &reply).await?;
        }
        info!("Client disconnected");
        Ok(())
    }

    /// Runs one command and renders its reply, errors included.
    pub async fn dispatch(&self, command: ClientCommand) -> String {
        let result = match command {
            ClientCommand::Locate { access, path } => self.locate(access, &path).await,
            ClientCommand::List { path } => self.list(path.as_deref()).await,
            ClientCommand::Create {
                kind,
                server_id,
                path,
            } => self.create(kind, server_id, &path).await,
            ClientCommand::Delete { path } => self.delete(&path).await,
            ClientCommand::Copy {
                source,
                destination,
            } => self.copy(&source, &destination).await,
            ClientCommand::Exit => Ok(EXITING.to_owned()),
        };
        result.unwrap_or_else(|e| error_reply(&e))
    }

    #[instrument(name = "router_locate", skip(self))]
    async fn locate(&self, access: AccessKind, path: &str) -> std::result::Result<String, FsError> {
        let resolved = self.registry.resolve_active(path).await?;
        let identity = &resolved.server.identity;
        debug!(id = resolved.server.id, verb = access.verb(), "Resolved path");
        Ok(locate_reply(&identity.ip, identity.client_port))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::tests::{register_fake, tree_with};
    use protocol::reply::parse_error_reply;
    use tokio::io::{DuplexStream, duplex};
    use utilities::frame::read_text;

    pub(crate) fn router_with_registry() -> (CommandRouter, Arc<StorageRegistry>) {
        let registry = Arc::new(StorageRegistry::new(4, 5));
        (CommandRouter::new(registry.clone()), registry)
    }

    /// Answers storage commands from a fixed script, recording what it saw.
    /// The stream is handed back so the link stays up after the script ends.
    pub(crate) fn scripted_storage(
        mut stream: DuplexStream,
        replies: &[&str],
    ) -> tokio::task::JoinHandle<(Vec<String>, DuplexStream)> {
        let replies: Vec<String> = replies.iter().map(|reply| reply.to_string()).collect();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            for reply in replies {
                match read_text_opt(&mut stream).await {
                    Ok(Some(command)) => seen.push(command),
                    _ => break,
                }
                if write_text(&mut stream, &reply).await.is_err() {
                    break;
                }
            }
            (seen, stream)
        })
    }

    #[tokio::test]
    async fn locate_returns_client_address() {
        let (router, registry) = router_with_registry();
        let (_server, _s) = register_fake(&registry, "10.0.0.1", 100, tree_with("home", &["a.txt"])).await;
        let reply = router
            .dispatch("READ /home/a.txt".parse().unwrap())
            .await;
        assert_eq!(reply, "StorageServer: 10.0.0.1 : 101");
        let missing = router.dispatch("WRITE /nope.txt".parse().unwrap()).await;
        assert_eq!(parse_error_reply(&missing).unwrap().0, 404);
    }

    #[tokio::test]
    async fn client_loop_handles_errors_and_exit() {
        let (router, _registry) = router_with_registry();
        let (mut client, naming) = duplex(4096);
        let task = tokio::spawn(async move { router.handle_client(naming, "test".to_string()).await });
        write_text(&mut client, "FROB /x").await.unwrap();
        let reply = read_text(&mut client).await.unwrap();
        assert_eq!(
            parse_error_reply(&reply).unwrap(),
            (101, "Unknown command: FROB".to_string())
        );
        write_text(&mut client, "LIST").await.unwrap();
        let reply = read_text(&mut client).await.unwrap();
        assert_eq!(parse_error_reply(&reply).unwrap().0, 401);
        write_text(&mut client, "EXIT").await.unwrap();
        assert_eq!(read_text(&mut client).await.unwrap(), EXITING);
        task.await.unwrap().unwrap();
    }
}
