//! Bounded map with least-recently-used eviction
//!
//! Backed by an `IndexMap` kept in recency order: the front is the oldest entry.

use std::hash::Hash;

use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct LruMap<K, V> {
    entries: IndexMap<K, V>,
    capacity: usize,
    evictions: u64,
}

impl<K: Hash + Eq, V> LruMap<K, V> {
    /// `capacity` is clamped to at least one entry
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
            evictions: 0,
        }
    }

    /// Look up and mark as most recently used
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index_mut(last).map(|(_, v)| v)
    }

    /// Look up without touching recency
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert as most recently used, evicting the oldest entry when full
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(index) = self.entries.get_index_of(&key) {
            let last = self.entries.len() - 1;
            self.entries.move_index(index, last);
            return self.entries.insert(key, value);
        }
        if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
            self.evictions += 1;
        }
        self.entries.insert(key, value);
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key)
    }

    /// Keep only entries matching the predicate
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.entries.retain(|k, v| keep(k, v));
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
