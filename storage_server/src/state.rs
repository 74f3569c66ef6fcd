use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use fstree::{FsError, FsTree, NodeId, NodeKind, Permissions};
use storage::file_storage::FileStorage;
use tokio::sync::RwLock;

use crate::server::StorageServerOptions;

/// Everything the handlers of one storage server share.
pub struct StorageState {
    pub tree: RwLock<FsTree>,
    pub store: FileStorage,
    pub options: StorageServerOptions,
    /// Port of the client listener as bound.
    pub client_port: u16,
    next_client_id: AtomicU64,
}

/// A file resolved for a data operation, with its advisory lock taken.
#[derive(Debug, Clone)]
pub struct LockedFile {
    pub id: NodeId,
    pub name: String,
    pub location: String,
}

impl StorageState {
    pub fn new(tree: FsTree, store: FileStorage, options: StorageServerOptions, client_port: u16) -> Arc<Self> {
        Arc::new(Self {
            tree: RwLock::new(tree),
            store,
            options,
            client_port,
            next_client_id: AtomicU64::new(1),
        })
    }

    pub fn next_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Resolves a file needing `required` and takes its read lock.
    pub async fn lock_for_read(&self, path: &str, required: Permissions) -> Result<LockedFile, FsError> {
        self.lock_file(path, required, false).await
    }

    pub async fn lock_for_write(&self, path: &str) -> Result<LockedFile, FsError> {
        self.lock_file(path, Permissions::WRITE, true).await
    }

    /// Write lock regardless of the file's own permission bits.
    pub async fn lock_for_write_any(&self, path: &str) -> Result<LockedFile, FsError> {
        self.lock_file(path, Permissions::empty(), true).await
    }

    async fn lock_file(&self, path: &str, required: Permissions, write: bool) -> Result<LockedFile, FsError> {
        let mut tree = self.tree.write().await;
        let id = tree.resolve_path(path).ok_or(FsError::NotFound)?;
        let node = tree.node(id).ok_or(FsError::NotFound)?;
        if node.kind != NodeKind::File {
            return Err(FsError::NotAFile);
        }
        if !node.permissions.contains(required) {
            return Err(FsError::PermissionDenied);
        }
        let locked = LockedFile {
            id,
            name: node.name.clone(),
            location: node.data_location.clone(),
        };
        if write {
            tree.try_lock_write(id)?;
        } else {
            tree.try_lock_read(id)?;
        }
        Ok(locked)
    }

    pub async fn unlock_read(&self, file: &LockedFile) {
        self.tree.write().await.unlock_read(file.id);
    }

    pub async fn unlock_write(&self, file: &LockedFile) {
        self.tree.write().await.unlock_write(file.id);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{path::Path, time::Duration};
    use storage::storage::Storage;

    pub(crate) fn test_options(path: &Path) -> StorageServerOptions {
        StorageServerOptions {
            naming_addrs: "127.0.0.1:1".to_string(),
            naming_ack_addrs: None,
            advertise_ip: "127.0.0.1".to_string(),
            client_addrs: "127.0.0.1:0".to_string(),
            storage_path: path.to_path_buf(),
            async_write_threshold: 10,
            chunk_size: 4,
            reconnect_retries: 1,
            reconnect_delay: Duration::from_millis(10),
        }
    }

    /// State over `<dir>/<root>` with `files` written at its top level.
    pub(crate) async fn test_state(dir: &Path, root: &str, files: &[(&str, &str)]) -> Arc<StorageState> {
        let path = dir.join(root);
        std::fs::create_dir_all(&path).unwrap();
        for (name, content) in files {
            std::fs::write(path.join(name), content).unwrap();
        }
        let store = FileStorage::new(&path).await.unwrap();
        let tree = store.scan().await.unwrap();
        StorageState::new(tree, store, test_options(&path), 0)
    }

    #[tokio::test]
    async fn write_lock_excludes_readers() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), "home", &[("a.txt", "abc")]).await;
        let file = state.lock_for_write("/a.txt").await.unwrap();
        assert!(matches!(
            state.lock_for_read("/a.txt", Permissions::READ).await,
            Err(FsError::Busy(_))
        ));
        state.unlock_write(&file).await;
        let first = state.lock_for_read("/a.txt", Permissions::READ).await.unwrap();
        let second = state.lock_for_read("/a.txt", Permissions::READ).await.unwrap();
        assert!(matches!(state.lock_for_write("/a.txt").await, Err(FsError::Busy(_))));
        state.unlock_read(&first).await;
        state.unlock_read(&second).await;
        assert!(state.lock_for_write("/a.txt").await.is_ok());
        assert!(matches!(state.lock_for_write("/").await, Err(FsError::NotAFile)));
        assert_ne!(state.next_client_id(), state.next_client_id());
    }
}
