//! Entry table: the authoritative record of every cached object
//!
//! Owned exclusively by the command loop. Keeps the hit-bucket index and the
//! per-locality used-byte counters in step with the entries themselves.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{
    error::{CacheError, CacheResult},
    hit_index::HitBucketIndex,
};

/// Where the memory backing an entry lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Locality {
    Cpu,
    Gpu { device_id: u32 },
}

impl Locality {
    pub fn device_id(&self) -> Option<u32> {
        match self {
            Locality::Cpu => None,
            Locality::Gpu { device_id } => Some(*device_id),
        }
    }
}

impl std::fmt::Display for Locality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locality::Cpu => write!(f, "cpu"),
            Locality::Gpu { device_id } => write!(f, "gpu:{}", device_id),
        }
    }
}

/// How a consumer rebuilds the object from its segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SharedKind {
    /// Typed array, needs `shape` and `dtype`
    #[default]
    SharedMemory,
    ShareableList,
    ShareableTuple,
    ShareableDict,
    /// Device-resident copy made by the manager
    DeviceBuffer,
}

/// Opaque name of a shared-memory segment or device buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub String);

impl SegmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: String,
    pub handle: SegmentId,
    pub shape: Vec<usize>,
    pub dtype: String,
    pub size_bytes: u64,
    pub hit_count: u64,
    pub locality: Locality,
    pub kind: SharedKind,
}

impl CacheEntry {
    pub fn new(
        name: impl Into<String>,
        handle: SegmentId,
        size_bytes: u64,
        locality: Locality,
    ) -> Self {
        Self {
            name: name.into(),
            handle,
            shape: Vec::new(),
            dtype: String::new(),
            size_bytes,
            hit_count: 0,
            locality,
            kind: SharedKind::default(),
        }
    }

    pub fn with_layout(mut self, shape: Vec<usize>, dtype: impl Into<String>) -> Self {
        self.shape = shape;
        self.dtype = dtype.into();
        self
    }

    pub fn with_kind(mut self, kind: SharedKind) -> Self {
        self.kind = kind;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// Name already cached; nothing changed
    Duplicate,
}

#[derive(Debug, Default)]
pub struct EntryTable {
    entries: HashMap<String, CacheEntry>,
    hits: HitBucketIndex,
    used: HashMap<Locality, u64>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry with zero hits. Existing names are never overwritten.
    pub fn put(&mut self, mut entry: CacheEntry) -> PutOutcome {
        if self.entries.contains_key(&entry.name) {
            return PutOutcome::Duplicate;
        }
        entry.hit_count = 0;
        self.hits.add(&entry.name, 0);
        let used = self.used.entry(entry.locality).or_insert(0);
        *used = used.saturating_add(entry.size_bytes);
        self.entries.insert(entry.name.clone(), entry);
        PutOutcome::Inserted
    }

    pub fn get(&self, name: &str) -> Option<&CacheEntry> {
        self.entries.get(name)
    }

    /// Count one hit against `name`, returning the new hit count.
    pub fn record_hit(&mut self, name: &str) -> Option<u64> {
        let entry = self.entries.get_mut(name)?;
        let old = entry.hit_count;
        entry.hit_count = entry.hit_count.saturating_add(1);
        self.hits.move_entry(name, old, entry.hit_count);
        Some(entry.hit_count)
    }

    /// Delete `name` and its index membership, returning the removed entry.
    pub fn remove(&mut self, name: &str) -> CacheResult<CacheEntry> {
        let entry = self
            .entries
            .remove(name)
            .ok_or_else(|| CacheError::UnknownEntry {
                name: name.to_string(),
            })?;
        self.hits.remove(name, entry.hit_count);
        if let Some(used) = self.used.get_mut(&entry.locality) {
            *used = used.saturating_sub(entry.size_bytes);
        }
        Ok(entry)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn total_bytes(&self, locality: Locality) -> u64 {
        self.used.get(&locality).copied().unwrap_or(0)
    }

    pub fn hit_buckets(&self) -> &HitBucketIndex {
        &self.hits
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_entry(name: &str, size: u64) -> CacheEntry {
        CacheEntry::new(name, SegmentId::new(format!("psm_{}", name)), size, Locality::Cpu)
    }

    #[test]
    fn test_put_is_unique_and_never_overwrites() {
        let mut table = EntryTable::new();
        assert_eq!(table.put(cpu_entry("a", 10)), PutOutcome::Inserted);
        table.record_hit("a");

        let replacement =
            CacheEntry::new("a", SegmentId::new("other"), 99, Locality::Cpu).with_layout(vec![3], "f8");
        assert_eq!(table.put(replacement), PutOutcome::Duplicate);

        let entry = table.get("a").unwrap();
        assert_eq!(entry.handle.as_str(), "psm_a");
        assert_eq!(entry.size_bytes, 10);
        assert_eq!(entry.hit_count, 1);
        assert_eq!(table.total_bytes(Locality::Cpu), 10);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_put_resets_hit_count() {
        let mut table = EntryTable::new();
        let mut entry = cpu_entry("a", 1);
        entry.hit_count = 7;
        table.put(entry);
        assert_eq!(table.get("a").unwrap().hit_count, 0);
        assert!(table.hit_buckets().bucket(0).unwrap().contains("a"));
    }

    #[test]
    fn test_record_hit_moves_bucket() {
        let mut table = EntryTable::new();
        table.put(cpu_entry("a", 1));
        for expected in 1..=4 {
            assert_eq!(table.record_hit("a"), Some(expected));
        }
        let index = table.hit_buckets();
        assert_eq!(index.len(), 1);
        assert!(index.bucket(4).unwrap().contains("a"));
        assert!(index.bucket(0).is_none());
        assert_eq!(table.record_hit("missing"), None);
    }

    #[test]
    fn test_remove_returns_entry_and_clears_index() {
        let mut table = EntryTable::new();
        table.put(cpu_entry("a", 42));
        table.record_hit("a");

        let removed = table.remove("a").unwrap();
        assert_eq!(removed.size_bytes, 42);
        assert_eq!(removed.locality, Locality::Cpu);
        assert!(!table.contains("a"));
        assert!(table.hit_buckets().is_empty());
        assert_eq!(table.total_bytes(Locality::Cpu), 0);
    }

    #[test]
    fn test_remove_unknown_is_coherence_error() {
        let mut table = EntryTable::new();
        let err = table.remove("ghost").unwrap_err();
        assert!(err.is_coherence());
        assert!(matches!(err, CacheError::UnknownEntry { name } if name == "ghost"));
    }

    #[test]
    fn test_used_bytes_are_tracked_per_locality() {
        let mut table = EntryTable::new();
        let gpu0 = Locality::Gpu { device_id: 0 };
        let gpu1 = Locality::Gpu { device_id: 1 };
        table.put(cpu_entry("c", 5));
        table.put(CacheEntry::new("g0", SegmentId::new("d0"), 7, gpu0));
        table.put(CacheEntry::new("g1", SegmentId::new("d1"), 11, gpu1));

        assert_eq!(table.total_bytes(Locality::Cpu), 5);
        assert_eq!(table.total_bytes(gpu0), 7);
        assert_eq!(table.total_bytes(gpu1), 11);
        assert_eq!(table.total_bytes(Locality::Gpu { device_id: 9 }), 0);

        table.remove("g0").unwrap();
        assert_eq!(table.total_bytes(gpu0), 0);
        assert_eq!(table.total_bytes(gpu1), 11);
    }

    #[test]
    fn test_locality_display() {
        assert_eq!(Locality::Cpu.to_string(), "cpu");
        assert_eq!(Locality::Gpu { device_id: 3 }.to_string(), "gpu:3");
        assert_eq!(Locality::Gpu { device_id: 3 }.device_id(), Some(3));
        assert_eq!(Locality::Cpu.device_id(), None);
    }
}
