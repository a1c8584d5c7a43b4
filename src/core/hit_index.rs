//! Hit-count buckets used to pick eviction candidates
//!
//! Maps a hit count to the set of entry names that have exactly that many
//! hits. Buckets are pruned as soon as they become empty, so iteration only
//! ever yields populated buckets in ascending hit order.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default, Clone)]
pub struct HitBucketIndex {
    buckets: BTreeMap<u64, BTreeSet<String>>,
    members: usize,
}

impl HitBucketIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` under `hits`. Returns false if it was already there.
    pub fn add(&mut self, name: &str, hits: u64) -> bool {
        let inserted = self
            .buckets
            .entry(hits)
            .or_default()
            .insert(name.to_string());
        if inserted {
            self.members += 1;
        }
        inserted
    }

    /// Drop `name` from bucket `hits`, pruning the bucket if it empties.
    pub fn remove(&mut self, name: &str, hits: u64) -> bool {
        let Some(bucket) = self.buckets.get_mut(&hits) else {
            return false;
        };
        let removed = bucket.remove(name);
        if bucket.is_empty() {
            self.buckets.remove(&hits);
        }
        if removed {
            self.members -= 1;
        }
        removed
    }

    /// Relocate `name` from `old_hits` to `new_hits`.
    pub fn move_entry(&mut self, name: &str, old_hits: u64, new_hits: u64) {
        self.remove(name, old_hits);
        self.add(name, new_hits);
    }

    pub fn buckets_ascending(&self) -> impl Iterator<Item = (u64, &BTreeSet<String>)> {
        self.buckets.iter().map(|(hits, names)| (*hits, names))
    }

    pub fn bucket(&self, hits: u64) -> Option<&BTreeSet<String>> {
        self.buckets.get(&hits)
    }

    /// Total number of names across all buckets
    pub fn len(&self) -> usize {
        self.members
    }

    pub fn is_empty(&self) -> bool {
        self.members == 0
    }
}
