//! Bounded path cache with least-recently-used eviction.
//!
//! Entries live in a slab and are chained by index into a recency list, the
//! most recently used entry at the head. The key index and the list always
//! hold the same set of entries.

use std::collections::HashMap;

#[derive(Debug)]
struct Entry<V> {
    key: String,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct LruCache<V> {
    capacity: usize,
    index: HashMap<String, usize>,
    slots: Vec<Option<Entry<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V: Clone> LruCache<V> {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn entry(&self, slot: usize) -> Option<&Entry<V>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn entry_mut(&mut self, slot: usize) -> Option<&mut Entry<V>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.entry(slot).map(|entry| (entry.prev, entry.next)) else {
            return;
        };
        match prev {
            Some(prev) => {
                if let Some(entry) = self.entry_mut(prev) {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next) => {
                if let Some(entry) = self.entry_mut(next) {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(entry) = self.entry_mut(slot) {
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(old_head) = old_head {
            if let Some(entry) = self.entry_mut(old_head) {
                entry.prev = Some(slot);
            }
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn remove_slot(&mut self, slot: usize) -> Option<Entry<V>> {
        self.unlink(slot);
        let entry = self.slots.get_mut(slot)?.take()?;
        self.index.remove(&entry.key);
        self.free.push(slot);
        Some(entry)
    }

    /// Returns the cached value and marks it most recently used.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let slot = *self.index.get(key)?;
        self.unlink(slot);
        self.push_front(slot);
        self.entry(slot).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Inserts or refreshes `key`, returning the entry evicted to make room.
    pub fn put(&mut self, key: &str, value: V) -> Option<(String, V)> {
        if self.capacity == 0 {
            return None;
        }
        if let Some(&slot) = self.index.get(key) {
            if let Some(entry) = self.entry_mut(slot) {
                entry.value = value;
            }
            self.unlink(slot);
            self.push_front(slot);
            return None;
        }
        let evicted = match self.tail {
            Some(tail) if self.index.len() >= self.capacity => self
                .remove_slot(tail)
                .map(|entry| (entry.key, entry.value)),
            _ => None,
        };
        let entry = Entry {
            key: key.to_owned(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key.to_owned(), slot);
        self.push_front(slot);
        evicted
    }

    pub fn invalidate(&mut self, key: &str) -> Option<V> {
        let slot = *self.index.get(key)?;
        self.remove_slot(slot).map(|entry| entry.value)
    }

    /// Drops `path` and every cached path below it.
    pub fn invalidate_subtree(&mut self, path: &str) -> usize {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let doomed: Vec<usize> = self
            .index
            .iter()
            .filter(|(key, _)| key.as_str() == path || key.starts_with(&prefix))
            .map(|(_, slot)| *slot)
            .collect();
        for slot in &doomed {
            self.remove_slot(*slot);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let Some(entry) = self.entry(slot) else {
                break;
            };
            keys.push(entry.key.as_str());
            cursor = entry.next;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_consistent(cache: &LruCache<u32>) {
        let keys = cache.keys_by_recency();
        assert_eq!(keys.len(), cache.len());
        assert!(cache.len() <= cache.capacity());
        for key in keys {
            assert!(cache.contains(key));
        }
    }

    #[test]
    fn evicts_least_recently_touched() {
        let mut cache = LruCache::new(3);
        assert!(cache.put("/a", 1).is_none());
        assert!(cache.put("/b", 2).is_none());
        assert!(cache.put("/c", 3).is_none());
        assert_eq!(cache.put("/d", 4), Some(("/a".to_string(), 1)));
        assert_eq!(cache.keys_by_recency(), vec!["/d", "/c", "/b"]);
        assert_consistent(&cache);
    }

    #[test]
    fn get_promotes_entry() {
        let mut cache = LruCache::new(3);
        cache.put("/a", 1);
        cache.put("/b", 2);
        cache.put("/c", 3);
        assert_eq!(cache.get("/a"), Some(1));
        assert_eq!(cache.put("/d", 4), Some(("/b".to_string(), 2)));
        assert!(cache.contains("/a"));
        assert_consistent(&cache);
    }

    #[test]
    fn churn_below_capacity_keeps_promoted_key() {
        let capacity = 5;
        let mut cache = LruCache::new(capacity);
        cache.put("/hot", 0);
        for round in 0..50u32 {
            // capacity - 1 fresh keys per round, the hot key touched between them
            for slot in 0..(capacity as u32 - 1) {
                assert_eq!(cache.get("/hot"), Some(0));
                cache.put(&format!("/cold/{round}/{slot}"), round);
                assert_consistent(&cache);
            }
        }
        assert_eq!(cache.len(), capacity);
        assert_eq!(cache.keys_by_recency()[1], "/hot");
    }

    #[test]
    fn put_existing_key_refreshes_value() {
        let mut cache = LruCache::new(2);
        cache.put("/a", 1);
        cache.put("/b", 2);
        assert!(cache.put("/a", 10).is_none());
        assert_eq!(cache.keys_by_recency(), vec!["/a", "/b"]);
        assert_eq!(cache.get("/a"), Some(10));
        assert_consistent(&cache);
    }

    #[test]
    fn invalidation_frees_slots() {
        let mut cache = LruCache::new(3);
        cache.put("/docs", 1);
        cache.put("/docs/a.txt", 2);
        cache.put("/docs2", 3);
        assert_eq!(cache.invalidate_subtree("/docs"), 2);
        assert_eq!(cache.keys_by_recency(), vec!["/docs2"]);
        assert_eq!(cache.invalidate("/docs2"), Some(3));
        assert!(cache.is_empty());
        cache.put("/x", 4);
        cache.put("/y", 5);
        cache.put("/z", 6);
        assert_eq!(cache.len(), 3);
        assert_consistent(&cache);
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let mut cache = LruCache::new(0);
        assert!(cache.put("/a", 1).is_none());
        assert!(cache.get("/a").is_none());
        assert!(cache.is_empty());
    }
}
