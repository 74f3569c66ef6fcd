//! Registered storage servers and path lookup across their shadow trees.
//!
//! Entries are spread over independently locked buckets keyed by
//! (ip, registration port). Whole table scans take one bucket lock at a time.
//! Root name uniqueness spans buckets, so it lives in its own index behind a
//! single lock that every registration takes first.

pub mod link;
pub mod server;

use std::{
    collections::{HashMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::Arc,
};

use fstree::{FsError, FsTree, NodeId, TreeId};
use tokio::sync::{Mutex, Notify, RwLock};
use utilities::logger::{info, instrument, trace, tracing};

use crate::cache::LruCache;
use link::ServerLink;
use server::{ServerIdentity, ServerKey, StorageServer};

/// What the path cache remembers: the tree instance and the node in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedNode {
    pub tree: TreeId,
    pub node: NodeId,
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub server: Arc<StorageServer>,
    pub node: NodeId,
}

#[derive(Debug, Default)]
struct RootIndex {
    by_root: HashMap<String, ServerKey>,
    registered: u32,
}

pub struct StorageRegistry {
    buckets: Vec<RwLock<HashMap<ServerKey, Arc<StorageServer>>>>,
    roots: Mutex<RootIndex>,
    cache: Mutex<LruCache<CachedNode>>,
    membership: Arc<Notify>,
}

impl StorageRegistry {
    pub fn new(bucket_count: usize, cache_capacity: usize) -> Self {
        Self {
            buckets: (0..bucket_count.max(1))
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            roots: Mutex::new(RootIndex::default()),
            cache: Mutex::new(LruCache::new(cache_capacity)),
            membership: Arc::new(Notify::new()),
        }
    }

    /// Notified on every registration and whenever a link goes inactive.
    pub fn membership(&self) -> Arc<Notify> {
        self.membership.clone()
    }

    fn bucket(&self, key: &ServerKey) -> &RwLock<HashMap<ServerKey, Arc<StorageServer>>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.buckets[hasher.finish() as usize % self.buckets.len()]
    }

    /// Adds a server. An existing entry with the same root name, active or
    /// not, is replaced: its link is closed and its id carried over.
    #[instrument(name = "registry_register", skip(self, tree, link), fields(ip = %identity.ip, port = identity.registration_port))]
    pub async fn register(&self, identity: ServerIdentity, tree: FsTree, link: ServerLink) -> Arc<StorageServer> {
        let mut roots = self.roots.lock().await;
        let root_name = tree.root_name().to_owned();
        let previous = match roots.by_root.get(&root_name).cloned() {
            Some(old_key) => self.bucket(&old_key).write().await.remove(&old_key),
            None => None,
        };
        let id = match &previous {
            Some(old) => {
                old.link.close();
                info!(id = old.id, root = %root_name, "Replacing previous registration of this root");
                old.id
            }
            None => {
                roots.registered += 1;
                roots.registered
            }
        };
        let key = identity.key();
        let server = Arc::new(StorageServer::new(id, identity, tree, link));
        if let Some(displaced) = self.bucket(&key).write().await.insert(key.clone(), server.clone()) {
            // same address, different root
            if displaced.root_name != root_name {
                roots.by_root.remove(&displaced.root_name);
            }
            displaced.link.close();
        }
        roots.by_root.insert(root_name, key);
        drop(roots);
        info!(id, root = %server.root_name, "Storage server registered");
        self.membership.notify_one();
        server
    }

    /// Number of distinct servers ever registered, the highest id handed out.
    pub async fn registered_count(&self) -> u32 {
        self.roots.lock().await.registered
    }

    /// Every entry, active or not, ordered by id.
    pub async fn servers(&self) -> Vec<Arc<StorageServer>> {
        let mut servers = Vec::new();
        for bucket in &self.buckets {
            servers.extend(bucket.read().await.values().cloned());
        }
        servers.sort_by_key(|server| server.id);
        servers
    }

    pub async fn active_servers(&self) -> Vec<Arc<StorageServer>> {
        let mut servers = self.servers().await;
        servers.retain(|server| server.is_active());
        servers
    }

    pub async fn find_by_id(&self, id: u32) -> Option<Arc<StorageServer>> {
        for bucket in &self.buckets {
            if let Some(server) = bucket.read().await.values().find(|server| server.id == id) {
                return Some(server.clone());
            }
        }
        None
    }

    async fn find_by_tree(&self, tree: TreeId) -> Option<Arc<StorageServer>> {
        for bucket in &self.buckets {
            if let Some(server) = bucket.read().await.values().find(|server| server.tree_id == tree) {
                return Some(server.clone());
            }
        }
        None
    }

    /// The active server serving `path`. A cache hit is only trusted while
    /// its server is still active and still holds the cached node, otherwise
    /// the entry is dropped and the buckets are scanned.
    #[instrument(name = "registry_resolve_by_path", skip(self))]
    pub async fn resolve_by_path(&self, path: &str) -> Option<Resolved> {
        let cached = self.cache.lock().await.get(path);
        if let Some(cached) = cached {
            if let Some(server) = self.find_by_tree(cached.tree).await {
                if server.is_active() && server.tree.read().await.contains(cached.node) {
                    trace!(id = server.id, "Path cache hit");
                    return Some(Resolved {
                        server,
                        node: cached.node,
                    });
                }
            }
            trace!("Dropping stale path cache entry");
            self.cache.lock().await.invalidate(path);
        }
        for bucket in &self.buckets {
            let servers: Vec<Arc<StorageServer>> = bucket.read().await.values().cloned().collect();
            for server in servers {
                if !server.is_active() {
                    continue;
                }
                let node = server.tree.read().await.resolve_path(path);
                if let Some(node) = node {
                    self.cache.lock().await.put(
                        path,
                        CachedNode {
                            tree: server.tree_id,
                            node,
                        },
                    );
                    return Some(Resolved { server, node });
                }
            }
        }
        None
    }

    /// Every server, active or not, whose tree holds `path`, ordered by id.
    pub async fn resolve_all_by_path(&self, path: &str) -> Vec<Resolved> {
        let mut found = Vec::new();
        for server in self.servers().await {
            let node = server.tree.read().await.resolve_path(path);
            if let Some(node) = node {
                found.push(Resolved { server, node });
            }
        }
        found
    }

    /// Like [`Self::resolve_by_path`] but tells a path held only by inactive
    /// servers apart from a path nobody has.
    pub async fn resolve_active(&self, path: &str) -> Result<Resolved, FsError> {
        if let Some(resolved) = self.resolve_by_path(path).await {
            return Ok(resolved);
        }
        if self.resolve_all_by_path(path).await.is_empty() {
            Err(FsError::NotFound)
        } else {
            Err(FsError::ServerInactive)
        }
    }

    /// Drops `path` and everything cached below it.
    pub async fn invalidate(&self, path: &str) {
        self.cache.lock().await.invalidate_subtree(path);
    }

    pub async fn cached_paths(&self) -> Vec<String> {
        self.cache
            .lock()
            .await
            .keys_by_recency()
            .into_iter()
            .map(str::to_owned)
            .collect()
    }
}
