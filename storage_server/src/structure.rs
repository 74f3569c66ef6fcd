//! Structural changes applied to disk and to the local tree together.

use std::io::ErrorKind;

use fstree::{FsError, Node, NodeId, NodeKind, Permissions, join_location, split_parent};
use storage::storage::Storage;
use utilities::logger::{error, info, instrument, tracing};

use crate::state::StorageState;

fn create_error(e: FsError, name: &str) -> FsError {
    match e {
        FsError::Io(io) if io.kind() == ErrorKind::AlreadyExists => FsError::AlreadyExists(name.to_owned()),
        FsError::Io(_) => FsError::CreateFailed,
        other => other,
    }
}

/// Creates `name` inside the directory at `dir_path`, on disk first.
#[instrument(name = "structure_create", skip(state))]
pub async fn create_in(
    state: &StorageState,
    dir_path: &str,
    name: &str,
    kind: NodeKind,
    permissions: Permissions,
) -> Result<NodeId, FsError> {
    let mut tree = state.tree.write().await;
    let parent = tree.resolve_path(dir_path).ok_or(FsError::ParentMissing)?;
    let parent_node = tree.node(parent).ok_or(FsError::ParentMissing)?;
    if !parent_node.is_dir() {
        return Err(FsError::NotADirectory);
    }
    if tree.find(parent, name).is_some() {
        return Err(FsError::AlreadyExists(name.to_owned()));
    }
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(FsError::Malformed(format!("invalid name {name:?}")));
    }
    let location = join_location(&parent_node.data_location, name);
    let created = match kind {
        NodeKind::File => state.store.create_file(&location).await,
        NodeKind::Directory => state.store.create_dir(&location).await,
    };
    created.map_err(|e| create_error(e, name))?;
    let id = tree.insert(parent, Node::new(name, kind, permissions, &location))?;
    info!(%location, "Created");
    Ok(id)
}

/// CREATE from the naming server: a full path, default permissions.
pub async fn create_path(state: &StorageState, path: &str, kind: NodeKind) -> Result<NodeId, FsError> {
    let (parent, name) =
        split_parent(path).ok_or_else(|| FsError::Malformed(format!("no file name in {path}")))?;
    create_in(state, parent, name, kind, Permissions::created()).await
}

/// Removes the node at `path` and everything below it. Refused while any
/// file in the subtree is locked.
#[instrument(name = "structure_delete", skip(state))]
pub async fn delete_path(state: &StorageState, path: &str) -> Result<usize, FsError> {
    let mut tree = state.tree.write().await;
    let id = tree.resolve_path(path).ok_or(FsError::NotFound)?;
    let location = tree.node(id).ok_or(FsError::NotFound)?.data_location.clone();
    tree.ensure_deletable(id)?;
    if let Err(e) = state.store.remove(&location).await {
        error!(error = %e, %location, "Removing from disk failed, tree left as is");
        return Err(FsError::DeleteFailed);
    }
    Ok(tree.delete(id)?.len())
}
