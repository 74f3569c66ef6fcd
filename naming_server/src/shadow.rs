//! Keeps the naming server's copy of a storage server's tree in step with the
//! structural operations that storage server confirmed.

use fstree::{FsError, NodeId, NodeKind, split_parent};
use protocol::backup::is_backup_dir;

use crate::registry::server::StorageServer;

/// Parent directory path and final name of `path`.
pub fn parent_and_name(path: &str) -> Result<(&str, &str), FsError> {
    split_parent(path).ok_or_else(|| FsError::Malformed(format!("no file name in {path}")))
}

pub async fn create(server: &StorageServer, path: &str, kind: NodeKind) -> Result<NodeId, FsError> {
    let (parent, name) = parent_and_name(path)?;
    let mut tree = server.tree.write().await;
    let parent = tree.resolve_path(parent).ok_or(FsError::ParentMissing)?;
    tree.create_empty(parent, name, kind)
}

pub async fn delete(server: &StorageServer, path: &str) -> Result<usize, FsError> {
    let mut tree = server.tree.write().await;
    let node = tree.resolve_path(path).ok_or(FsError::NotFound)?;
    Ok(tree.delete(node)?.len())
}

/// Copies the subtree at `source_path` of `source` into `dest_dir` of `dest`
/// as `name`. A copy of a root leaves out its backup directories.
pub async fn mirror(
    source: &StorageServer,
    source_path: &str,
    dest: &StorageServer,
    dest_dir: &str,
    name: &str,
) -> Result<NodeId, FsError> {
    let snapshot = {
        let tree = source.tree.read().await;
        let node = tree.resolve_path(source_path).ok_or(FsError::NotFound)?;
        let snapshot = tree.snapshot(node)?;
        if node == tree.root() {
            snapshot.without_children(is_backup_dir)
        } else {
            snapshot
        }
    };
    let mut tree = dest.tree.write().await;
    let dir = tree.resolve_path(dest_dir).ok_or(FsError::ParentMissing)?;
    tree.graft(dir, &snapshot, name)
}
