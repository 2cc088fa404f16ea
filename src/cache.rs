//! Bounded result cache with least-frequently-used eviction
//!
//! Entries keep an access counter and an insertion order. Hits bump the
//! counter and move the entry to the freshest position, but eviction is
//! driven by the counter: when full, the entry with the fewest accesses
//! goes. Among equal counters the stalest position is evicted.

use indexmap::IndexMap;
use std::sync::Arc;

use crate::state::ProcessedIcon;

/// A cached result and how often it was used
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Arc<ProcessedIcon>,
    pub access_count: u64,
}

/// Fixed-capacity LFU cache keyed by icon source (or composite key)
#[derive(Debug)]
pub struct IconCache {
    capacity: usize,
    /// Front = stalest, back = freshest
    entries: IndexMap<String, CacheEntry>,
}

impl IconCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: IndexMap::with_capacity(capacity),
        }
    }

    /// Look up a key, counting the access
    pub fn get(&mut self, key: &str) -> Option<Arc<ProcessedIcon>> {
        let (_, key, mut entry) = self.entries.shift_remove_full(key)?;
        entry.access_count += 1;
        let value = Arc::clone(&entry.value);
        self.entries.insert(key, entry);
        Some(value)
    }

    /// Look up a key without touching its counter or position
    pub fn peek(&self, key: &str) -> Option<&Arc<ProcessedIcon>> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Insert or refresh an entry, evicting the least used one when full
    pub fn set(&mut self, key: impl Into<String>, value: Arc<ProcessedIcon>) {
        let key = key.into();

        if let Some(mut entry) = self.entries.shift_remove(&key) {
            entry.access_count += 1;
            entry.value = value;
            self.entries.insert(key, entry);
            return;
        }

        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.evict_least_used() {
                tracing::debug!(key = %evicted, "evicted icon from cache");
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                access_count: 1,
            },
        );
    }

    /// Whether a key is cached (does not count as an access)
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Access counter of a key
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.access_count)
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

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove the entry with the minimum access count.
    /// `min_by_key` keeps the first minimum, i.e. the stalest one.
    fn evict_least_used(&mut self) -> Option<String> {
        let index = self
            .entries
            .values()
            .enumerate()
            .min_by_key(|(_, entry)| entry.access_count)
            .map(|(index, _)| index)?;
        self.entries.shift_remove_index(index).map(|(key, _)| key)
    }
}
