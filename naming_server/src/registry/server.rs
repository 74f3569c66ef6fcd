use fstree::{FsTree, TreeId};
use tokio::sync::{Mutex, RwLock};

use super::link::ServerLink;

/// Key of a registry entry: advertised ip and registration port.
pub type ServerKey = (String, u16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub ip: String,
    pub registration_port: u16,
    pub client_port: u16,
}

impl ServerIdentity {
    pub fn key(&self) -> ServerKey {
        (self.ip.clone(), self.registration_port)
    }

    pub fn client_addrs(&self) -> String {
        format!("{}:{}", self.ip, self.client_port)
    }
}

/// Ids of the peers holding this server's `/backup_<id>` copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupSlots {
    pub primary: Option<u32>,
    pub secondary: Option<u32>,
}

#[derive(Debug)]
pub struct StorageServer {
    pub id: u32,
    pub identity: ServerIdentity,
    pub tree_id: TreeId,
    pub root_name: String,
    /// Shadow copy of the server's tree.
    pub tree: RwLock<FsTree>,
    pub link: ServerLink,
    pub backups: Mutex<BackupSlots>,
}

impl StorageServer {
    pub fn new(id: u32, identity: ServerIdentity, tree: FsTree, link: ServerLink) -> Self {
        Self {
            id,
            identity,
            tree_id: tree.id(),
            root_name: tree.root_name().to_owned(),
            tree: RwLock::new(tree),
            link,
            backups: Mutex::new(BackupSlots::default()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.link.is_active()
    }
}
