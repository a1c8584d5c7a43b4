//! Read-only replica of entry metadata
//!
//! The command loop publishes every PUT, hit and removal here so clients can
//! check presence and fetch handles without a queue round trip. Reads may
//! lag the loop; anything correctness-critical is decided inside the loop.

use std::sync::Arc;

use dashmap::DashMap;

use super::entry::CacheEntry;

#[derive(Debug, Clone, Default)]
pub struct EntryReplica {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl EntryReplica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<CacheEntry> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub(crate) fn publish(&self, entry: &CacheEntry) {
        self.entries.insert(entry.name.clone(), entry.clone());
    }

    pub(crate) fn set_hits(&self, name: &str, hits: u64) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.hit_count = hits;
        }
    }

    pub(crate) fn retract(&self, name: &str) {
        self.entries.remove(name);
    }
}
