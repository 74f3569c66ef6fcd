use std::sync::Arc;

use fstree::{FsError, NodeKind};
use protocol::{
    command::{ServerInfo, StorageCommand},
    reply::{COPY_ACK, COPY_DONE, CREATE_DONE, DELETE_DONE, DIRECTORY_COPIED, FILE_COPIED, is_busy_reply},
};
use utilities::logger::{info, instrument, warn, tracing};

use super::CommandRouter;
use crate::{
    registry::{Resolved, server::StorageServer},
    shadow::{self, parent_and_name},
};

async fn kind_of(resolved: &Resolved) -> Result<NodeKind, FsError> {
    resolved
        .server
        .tree
        .read()
        .await
        .node(resolved.node)
        .map(|node| node.kind)
        .ok_or(FsError::NotFound)
}

async fn name_of(resolved: &Resolved) -> Result<String, FsError> {
    resolved
        .server
        .tree
        .read()
        .await
        .node(resolved.node)
        .map(|node| node.name.clone())
        .ok_or(FsError::NotFound)
}

impl CommandRouter {
    #[instrument(name = "router_create", skip(self))]
    pub(super) async fn create(&self, kind: NodeKind, server_id: u32, path: &str) -> Result<String, FsError> {
        let server = self
            .registry
            .find_by_id(server_id)
            .await
            .filter(|server| server.is_active())
            .ok_or(FsError::ServerInactive)?;
        let command = StorageCommand::Create {
            kind,
            server_id,
            path: path.to_owned(),
        };
        let reply = server.link.exchange(&command.to_string()).await?;
        if reply == CREATE_DONE {
            if let Err(e) = shadow::create(&server, path, kind).await {
                warn!(error = %e, "Created on storage server but not in the shadow tree");
            }
        }
        Ok(reply)
    }

    #[instrument(name = "router_delete", skip(self))]
    pub(super) async fn delete(&self, path: &str) -> Result<String, FsError> {
        let resolved = self.registry.resolve_active(path).await?;
        let command = StorageCommand::Delete {
            path: path.to_owned(),
        };
        let reply = resolved.server.link.exchange(&command.to_string()).await?;
        if reply == DELETE_DONE {
            match shadow::delete(&resolved.server, path).await {
                Ok(removed) => info!(removed, "Deleted from shadow tree"),
                Err(e) => warn!(error = %e, "Deleted on storage server but not in the shadow tree"),
            }
            self.registry.invalidate(path).await;
        }
        Ok(reply)
    }

    /// Resolves where a copy lands: an existing directory keeps the source's
    /// name, a missing path is created in its parent under its last component.
    async fn copy_target(&self, destination: &str, source_name: String) -> Result<(Resolved, String, String), FsError> {
        if let Some(dest) = self.registry.resolve_by_path(destination).await {
            if kind_of(&dest).await? != NodeKind::Directory {
                return Err(FsError::NotADirectory);
            }
            return Ok((dest, destination.to_owned(), source_name));
        }
        let (parent, name) = parent_and_name(destination)?;
        let parent = if parent.is_empty() { "/" } else { parent };
        let dest = self.registry.resolve_active(parent).await?;
        if kind_of(&dest).await? != NodeKind::Directory {
            return Err(FsError::NotADirectory);
        }
        Ok((dest, parent.to_owned(), name.to_owned()))
    }

    #[instrument(name = "router_copy", skip(self))]
    pub(super) async fn copy(&self, source: &str, destination: &str) -> Result<String, FsError> {
        let src = self.registry.resolve_active(source).await?;
        let source_kind = kind_of(&src).await?;
        let (dest, dest_dir, name) = self.copy_target(destination, name_of(&src).await?).await?;
        let reply = run_copy(&src.server, source, &dest.server, &dest_dir, &name).await?;
        if is_busy_reply(&reply) {
            info!(from = src.server.id, "Copy source is being written, client may retry");
            return Ok(reply);
        }
        if reply != COPY_DONE {
            return Ok(reply);
        }
        if let Err(e) = shadow::mirror(&src.server, source, &dest.server, &dest_dir, &name).await {
            warn!(error = %e, "Copied on storage servers but not in the shadow tree");
        }
        info!(from = src.server.id, to = dest.server.id, "Copy finished");
        Ok(match source_kind {
            NodeKind::File => FILE_COPIED.to_owned(),
            NodeKind::Directory => DIRECTORY_COPIED.to_owned(),
        })
    }
}

/// Drives the COPY exchange with the source server and returns its final
/// reply, `COPY DONE` on success or whatever it answered instead.
pub(crate) async fn run_copy(
    source: &Arc<StorageServer>,
    source_path: &str,
    dest: &Arc<StorageServer>,
    dest_dir: &str,
    name: &str,
) -> Result<String, FsError> {
    let command = StorageCommand::Copy {
        source: source_path.to_owned(),
        dest_dir: dest_dir.to_owned(),
        name: name.to_owned(),
    };
    let session = source.link.session().await?;
    let reply = session.exchange(&command.to_string()).await?;
    if reply != COPY_ACK {
        return Ok(reply);
    }
    let peer = ServerInfo {
        ip: dest.identity.ip.clone(),
        port: dest.identity.client_port,
    };
    session.exchange(&peer.to_string()).await
}
