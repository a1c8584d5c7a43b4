//! Eviction policy: least-hit entries go first
//!
//! One policy serves every locality. Candidates are taken bucket by bucket in
//! ascending hit order, restricted to the locality that needs room, and
//! locked entries are never chosen. Eviction is best effort: if the cache
//! cannot be brought under the ceiling the caller still inserts.

use tracing::debug;

use super::{
    entry::{CacheEntry, EntryTable, Locality},
    lock_set::LockSet,
};

#[derive(Debug, Default)]
pub struct EvictionOutcome {
    /// Removed entries, in eviction order
    pub evicted: Vec<CacheEntry>,
    pub bytes_freed: u64,
}

impl EvictionOutcome {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// Evict from `locality` until `requested_bytes` more fit under `capacity_bytes`
/// or nothing evictable is left.
pub fn make_room(
    table: &mut EntryTable,
    locks: &LockSet,
    locality: Locality,
    requested_bytes: u64,
    capacity_bytes: u64,
) -> EvictionOutcome {
    let fits = |table: &EntryTable| {
        table.total_bytes(locality).saturating_add(requested_bytes) <= capacity_bytes
    };

    let mut outcome = EvictionOutcome::default();
    if fits(table) {
        return outcome;
    }

    debug!(
        %locality,
        requested_bytes,
        used_bytes = table.total_bytes(locality),
        capacity_bytes,
        "Checking cache status"
    );

    // Snapshot the candidate order so the table can be mutated while walking it
    let candidates: Vec<String> = table
        .hit_buckets()
        .buckets_ascending()
        .flat_map(|(_, names)| names.iter())
        .filter(|name| !locks.is_locked(name))
        .filter(|name| {
            table
                .get(name)
                .is_some_and(|entry| entry.locality == locality)
        })
        .cloned()
        .collect();

    for name in candidates {
        if fits(table) {
            break;
        }
        if let Ok(entry) = table.remove(&name) {
            outcome.bytes_freed = outcome.bytes_freed.saturating_add(entry.size_bytes);
            outcome.evicted.push(entry);
        }
    }

    debug!(
        %locality,
        evicted = outcome.evicted.len(),
        bytes_freed = outcome.bytes_freed,
        "Evicting entries"
    );
    outcome
}
