//! Assigns every active storage server a primary and a secondary backup peer
//! and copies its whole tree into `/backup_<id>` on each of them.

use std::{sync::Arc, time::Duration};

use fstree::NodeKind;
use protocol::{
    backup::backup_dir_name,
    command::StorageCommand,
    reply::{COPY_DONE, CREATE_DONE, DELETE_DONE, is_busy_reply},
};
use utilities::logger::{Instrument, Level, debug, error, info, instrument, span, warn, tracing};

use crate::{
    registry::{StorageRegistry, server::StorageServer},
    router::run_copy,
    shadow,
};

/// Wait before another round when a source was busy during the last one.
const BUSY_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Candidate probed for a backup slot. Ids are 1-based and `shift` is the
/// probe offset, plus one for the secondary slot.
pub fn probe_candidate(id: u32, count: u32, shift: u32) -> u32 {
    let count = i64::from(count.max(1));
    let zero_based = (i64::from(id) - 1 - i64::from(shift)).rem_euclid(count);
    zero_based as u32 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    Taken,
    /// A file of the source was being written; nothing was copied.
    SourceBusy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub taken: usize,
    pub busy: usize,
}

enum SlotOutcome {
    Filled,
    Busy,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Primary,
    Secondary,
}

impl Slot {
    fn extra_shift(&self) -> u32 {
        match self {
            Slot::Primary => 0,
            Slot::Secondary => 1,
        }
    }
}

pub struct ReplicationManager {
    registry: Arc<StorageRegistry>,
    min_servers: usize,
}

impl ReplicationManager {
    pub fn new(registry: Arc<StorageRegistry>, min_servers: usize) -> Self {
        Self {
            registry,
            min_servers,
        }
    }

    /// Runs a round after every membership change. Changes that arrive
    /// during a round fold into one follow-up round. A round that met a
    /// busy source is followed by another after [`BUSY_RETRY_DELAY`].
    pub fn start(self) {
        let membership = self.registry.membership();
        let span = span!(Level::INFO, "replication_manager");
        tokio::spawn(
            async move {
                let mut retry = false;
                loop {
                    if retry {
                        tokio::select! {
                            _ = membership.notified() => {}
                            _ = tokio::time::sleep(BUSY_RETRY_DELAY) => debug!("Retrying busy backups"),
                        }
                    } else {
                        membership.notified().await;
                    }
                    retry = self.run_round().await.busy > 0;
                }
            }
            .instrument(span),
        );
    }

    /// Fills every empty or stale backup slot it can.
    #[instrument(name = "replication_round", skip(self))]
    pub async fn run_round(&self) -> RoundReport {
        let mut report = RoundReport::default();
        let active = self.registry.active_servers().await;
        if active.len() < self.min_servers {
            debug!(active = active.len(), "Not enough active servers for replication");
            return report;
        }
        let count = self.registry.registered_count().await;
        for server in &active {
            for slot in [Slot::Primary, Slot::Secondary] {
                match self.fill_slot(server, slot, count).await {
                    SlotOutcome::Filled => report.taken += 1,
                    SlotOutcome::Busy => report.busy += 1,
                    SlotOutcome::Open => {}
                }
            }
        }
        report
    }

    async fn slot_is_live(&self, peer: Option<u32>) -> bool {
        match peer {
            Some(id) => self
                .registry
                .find_by_id(id)
                .await
                .is_some_and(|peer| peer.is_active()),
            None => false,
        }
    }

    async fn fill_slot(&self, server: &Arc<StorageServer>, slot: Slot, count: u32) -> SlotOutcome {
        let slots = *server.backups.lock().await;
        let (current, other) = match slot {
            Slot::Primary => (slots.primary, slots.secondary),
            Slot::Secondary => (slots.secondary, slots.primary),
        };
        if self.slot_is_live(current).await {
            return SlotOutcome::Open;
        }
        for offset in 1..=count {
            let candidate = probe_candidate(server.id, count, offset + slot.extra_shift());
            if candidate == server.id || Some(candidate) == other {
                continue;
            }
            let Some(peer) = self.registry.find_by_id(candidate).await else {
                continue;
            };
            if !peer.is_active() {
                continue;
            }
            match self.take_backup(server, &peer).await {
                Ok(BackupOutcome::Taken) => {
                    let mut backups = server.backups.lock().await;
                    match slot {
                        Slot::Primary => backups.primary = Some(peer.id),
                        Slot::Secondary => backups.secondary = Some(peer.id),
                    }
                    info!(id = server.id, peer = peer.id, ?slot, "Backup taken");
                    return SlotOutcome::Filled;
                }
                // every other candidate would meet the same lock
                Ok(BackupOutcome::SourceBusy) => {
                    info!(id = server.id, peer = peer.id, ?slot, "Source busy, backup retried later");
                    return SlotOutcome::Busy;
                }
                Err(e) => warn!(id = server.id, peer = peer.id, error = %e, "Backup attempt failed"),
            }
        }
        debug!(id = server.id, ?slot, "No backup candidate available");
        SlotOutcome::Open
    }

    /// Recreates `/backup_<source id>` on `peer` and copies the source's
    /// root into it. A busy source leaves the directory empty.
    #[instrument(name = "replication_take_backup", skip(self, source, peer), fields(source = source.id, peer = peer.id))]
    pub async fn take_backup(
        &self,
        source: &Arc<StorageServer>,
        peer: &Arc<StorageServer>,
    ) -> utilities::result::Result<BackupOutcome> {
        let dir = format!("/{}", backup_dir_name(source.id));
        let stale = peer.tree.read().await.resolve_path(&dir).is_some();
        if stale {
            let command = StorageCommand::Delete { path: dir.clone() };
            let reply = peer.link.exchange(&command.to_string()).await?;
            if reply != DELETE_DONE {
                return Err(format!("removing old backup failed: {}", reply.trim()).into());
            }
            if let Err(e) = shadow::delete(peer, &dir).await {
                error!(error = %e, "Old backup missing from shadow tree");
            }
            self.registry.invalidate(&dir).await;
        }
        let command = StorageCommand::Create {
            kind: NodeKind::Directory,
            server_id: peer.id,
            path: dir.clone(),
        };
        let reply = peer.link.exchange(&command.to_string()).await?;
        if reply != CREATE_DONE {
            return Err(format!("creating backup directory failed: {}", reply.trim()).into());
        }
        shadow::create(peer, &dir, NodeKind::Directory).await?;
        let reply = run_copy(source, "/", peer, &dir, &source.root_name).await?;
        if is_busy_reply(&reply) {
            return Ok(BackupOutcome::SourceBusy);
        }
        if reply != COPY_DONE {
            return Err(format!("backup copy failed: {}", reply.trim()).into());
        }
        shadow::mirror(source, "/", peer, &dir, &source.root_name).await?;
        Ok(BackupOutcome::Taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{register_fake, tree_with};
    use fstree::FsError;
    use protocol::{command::ServerInfo, reply::error_reply};
    use tokio::io::DuplexStream;
    use utilities::frame::{read_text_opt, write_text};

    #[test]
    fn probe_ring_wraps() {
        assert_eq!(probe_candidate(1, 3, 1), 3);
        assert_eq!(probe_candidate(1, 3, 2), 2);
        assert_eq!(probe_candidate(3, 3, 1), 2);
        assert_eq!(probe_candidate(3, 3, 2), 1);
        assert_eq!(probe_candidate(2, 3, 3), 2);
        assert_eq!(probe_candidate(2, 3, 4), 1);
    }

    /// Says yes to every structural command a backup needs.
    fn agreeable_storage(stream: DuplexStream) {
        storage_busy_for(stream, 0);
    }

    /// Like [`agreeable_storage`], but the first `busy_copies` copies are
    /// refused as busy.
    fn storage_busy_for(mut stream: DuplexStream, mut busy_copies: usize) {
        let busy = error_reply(&FsError::busy_writing());
        tokio::spawn(async move {
            while let Ok(Some(command)) = read_text_opt(&mut stream).await {
                let reply = if command.starts_with("CREATE") {
                    CREATE_DONE
                } else if command.starts_with("DELETE") {
                    DELETE_DONE
                } else if command.starts_with("COPY") {
                    "COPY ACK"
                } else if command.parse::<ServerInfo>().is_ok() {
                    if busy_copies > 0 {
                        busy_copies -= 1;
                        busy.as_str()
                    } else {
                        COPY_DONE
                    }
                } else {
                    "?"
                };
                if write_text(&mut stream, reply).await.is_err() {
                    break;
                }
            }
        });
    }

    async fn three_servers(
        registry: &StorageRegistry,
    ) -> Vec<Arc<StorageServer>> {
        let mut servers = Vec::new();
        for (index, root) in ["one", "two", "three"].into_iter().enumerate() {
            let ip = format!("10.0.0.{}", index + 1);
            let (server, storage) = register_fake(registry, &ip, 100, tree_with(root, &["data.txt"])).await;
            agreeable_storage(storage);
            servers.push(server);
        }
        servers
    }

    #[tokio::test]
    async fn no_round_below_minimum() {
        let registry = Arc::new(StorageRegistry::new(4, 5));
        let (_a, s1) = register_fake(&registry, "10.0.0.1", 100, tree_with("one", &[])).await;
        let (_b, s2) = register_fake(&registry, "10.0.0.2", 100, tree_with("two", &[])).await;
        agreeable_storage(s1);
        agreeable_storage(s2);
        let manager = ReplicationManager::new(registry, 3);
        assert_eq!(manager.run_round().await, RoundReport::default());
    }

    #[tokio::test]
    async fn three_servers_get_two_distinct_backups() {
        let registry = Arc::new(StorageRegistry::new(4, 5));
        let servers = three_servers(&registry).await;
        let manager = ReplicationManager::new(registry.clone(), 3);
        assert_eq!(manager.run_round().await.taken, 6);
        for server in &servers {
            let slots = *server.backups.lock().await;
            let (primary, secondary) = (slots.primary.unwrap(), slots.secondary.unwrap());
            assert_ne!(primary, server.id);
            assert_ne!(secondary, server.id);
            assert_ne!(primary, secondary);
            let peer = registry.find_by_id(primary).await.unwrap();
            let path = format!("/backup_{}/{}/data.txt", server.id, server.root_name);
            assert!(peer.tree.read().await.resolve_path(&path).is_some());
        }
        assert_eq!(manager.run_round().await, RoundReport::default());
    }

    #[tokio::test]
    async fn busy_source_is_retried_next_round() {
        let registry = Arc::new(StorageRegistry::new(4, 5));
        let mut servers = Vec::new();
        for (index, root) in ["one", "two", "three"].into_iter().enumerate() {
            let ip = format!("10.0.0.{}", index + 1);
            let (server, storage) = register_fake(&registry, &ip, 100, tree_with(root, &["data.txt"])).await;
            storage_busy_for(storage, if index == 0 { 2 } else { 0 });
            servers.push(server);
        }
        let manager = ReplicationManager::new(registry.clone(), 3);
        let first = manager.run_round().await;
        assert_eq!(first, RoundReport { taken: 4, busy: 2 });
        let slots = *servers[0].backups.lock().await;
        assert_eq!((slots.primary, slots.secondary), (None, None));
        let second = manager.run_round().await;
        assert_eq!(second, RoundReport { taken: 2, busy: 0 });
        let slots = *servers[0].backups.lock().await;
        let peer = registry.find_by_id(slots.primary.unwrap()).await.unwrap();
        assert!(peer.tree.read().await.resolve_path("/backup_1/one/data.txt").is_some());
    }

    #[tokio::test]
    async fn inactive_peer_is_replaced() {
        let registry = Arc::new(StorageRegistry::new(4, 5));
        let servers = three_servers(&registry).await;
        let manager = ReplicationManager::new(registry.clone(), 3);
        manager.run_round().await;
        let (fourth, storage) =
            register_fake(&registry, "10.0.0.4", 100, tree_with("four", &[])).await;
        agreeable_storage(storage);
        manager.run_round().await;
        servers[2].link.close();
        manager.run_round().await;
        for server in servers.iter().take(2).chain(std::iter::once(&fourth)) {
            let slots = *server.backups.lock().await;
            for peer in [slots.primary, slots.secondary] {
                let peer = registry.find_by_id(peer.unwrap()).await.unwrap();
                assert!(peer.is_active());
                assert_ne!(peer.id, server.id);
            }
        }
    }
}
