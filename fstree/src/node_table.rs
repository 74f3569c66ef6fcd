use std::collections::{HashMap, hash_map::Entry};

use crate::{FsError, NodeId};

/// Number of bucket chains a directory is split into on the wire.
pub const TABLE_SIZE: usize = 10;

/// Bucket a child name falls into when a directory is sent as chains.
pub fn wire_bucket(name: &str) -> usize {
    let hash = name
        .bytes()
        .fold(0u32, |h, byte| h.wrapping_mul(31).wrapping_add(byte as u32));
    hash as usize % TABLE_SIZE
}

/// Children of a directory keyed by name.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    entries: HashMap<String, NodeId>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, id: NodeId) -> Result<(), FsError> {
        match self.entries.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(FsError::AlreadyExists(name.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.entries.get(name).copied()
    }

    pub fn remove(&mut self, name: &str) -> Option<NodeId> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.values().copied()
    }

    /// Children ordered by name.
    pub fn sorted(&self) -> Vec<(&str, NodeId)> {
        let mut children: Vec<(&str, NodeId)> = self
            .entries
            .iter()
            .map(|(name, id)| (name.as_str(), *id))
            .collect();
        children.sort_unstable_by(|a, b| a.0.cmp(b.0));
        children
    }

    /// Children grouped by [`wire_bucket`], each chain ordered by name.
    pub fn wire_buckets(&self) -> Vec<Vec<NodeId>> {
        let mut buckets = vec![Vec::new(); TABLE_SIZE];
        for (name, id) in self.sorted() {
            buckets[wire_bucket(name)].push(id);
        }
        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_names() {
        let mut table = NodeTable::new();
        table.insert("a.txt", NodeId::from_raw(1)).unwrap();
        let err = table.insert("a.txt", NodeId::from_raw(2)).unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(name) if name == "a.txt"));
        assert_eq!(table.find("a.txt"), Some(NodeId::from_raw(1)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn bucket_hash_is_stable() {
        // 'a' = 97
        assert_eq!(wire_bucket("a"), 7);
        // 97 * 31 + 98 = 3105
        assert_eq!(wire_bucket("ab"), 5);
        assert_eq!(wire_bucket(""), 0);
    }

    #[test]
    fn wire_buckets_cover_every_child_once() {
        let mut table = NodeTable::new();
        for (index, name) in ["x", "y", "z", "docs", "notes.txt"].iter().enumerate() {
            table.insert(name, NodeId::from_raw(index as u64)).unwrap();
        }
        let buckets = table.wire_buckets();
        assert_eq!(buckets.len(), TABLE_SIZE);
        assert_eq!(buckets.iter().map(Vec::len).sum::<usize>(), 5);
    }
}
