use std::{os::unix::fs::PermissionsExt, path::Path};

use fstree::{FsError, FsTree, Node, NodeId, NodeKind, Permissions};
use tokio::fs;
use tracing::{trace, warn};

use crate::storage::Result;

fn permissions_from_mode(mode: u32) -> Permissions {
    let mut permissions = Permissions::empty();
    if mode & 0o400 != 0 {
        permissions |= Permissions::READ;
    }
    if mode & 0o200 != 0 {
        permissions |= Permissions::WRITE;
    }
    if mode & 0o100 != 0 {
        permissions |= Permissions::EXECUTE;
    }
    permissions
}

/// Walks `root` breadth first and mirrors every visible entry into a tree
/// whose root is named after the last component of `root`.
pub async fn scan_directory(root: &Path) -> Result<FsTree> {
    let root_name = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_owned());
    let root_mode = fs::metadata(root).await?.permissions().mode();
    let mut tree = FsTree::new(
        &root_name,
        permissions_from_mode(root_mode),
        &root.to_string_lossy(),
    );
    let mut pending: Vec<(NodeId, std::path::PathBuf)> = vec![(tree.root(), root.to_path_buf())];
    while let Some((parent, dir)) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(path=%entry.path().display(),error=%e,"Skipping entry that can not be stat'ed");
                    continue;
                }
            };
            let kind = if metadata.is_dir() {
                NodeKind::Directory
            } else {
                NodeKind::File
            };
            let location = entry.path().to_string_lossy().into_owned();
            let node = Node::new(
                &name,
                kind,
                permissions_from_mode(metadata.permissions().mode()),
                &location,
            );
            let id = match tree.insert(parent, node) {
                Ok(id) => id,
                Err(FsError::AlreadyExists(_)) => continue,
                Err(e) => return Err(e),
            };
            if kind == NodeKind::Directory {
                pending.push((id, entry.path()));
            }
        }
    }
    trace!(nodes = tree.len(), root=%root.display(), "Scanned storage root");
    Ok(tree)
}
