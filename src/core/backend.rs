//! Memory backends that hold cached object bytes
//!
//! The manager only needs three operations: allocate a buffer at a locality,
//! copy an existing segment into it, and free a segment once its entry is
//! gone. [`HeapBackend`] keeps segments in process memory and is shared by
//! producers and the manager through cheap clones.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;

use super::{
    entry::{Locality, SegmentId},
    error::{BackendError, BackendResult},
};

pub trait MemoryBackend: Send + Sync {
    /// Reserve `size` zeroed bytes at `locality`
    fn allocate(&self, locality: Locality, size: u64) -> BackendResult<SegmentId>;

    /// Copy the contents of `src` into `dst`. Both must have equal sizes.
    fn copy_in(&self, dst: &SegmentId, src: &SegmentId) -> BackendResult<()>;

    /// Release `handle`. Freeing an unknown segment is an error.
    fn free(&self, handle: &SegmentId) -> BackendResult<()>;

    fn contains(&self, handle: &SegmentId) -> bool;
}

#[derive(Debug)]
struct Segment {
    locality: Locality,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct HeapBackend {
    segments: Arc<DashMap<SegmentId, Segment>>,
    next_id: Arc<AtomicU64>,
    /// Total bytes the backend will hold, `None` for unbounded
    limit: Option<u64>,
}

impl HeapBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Store `bytes` as a new host segment, the way a producer publishes an
    /// object before announcing it with PUT.
    pub fn write_segment(&self, bytes: Vec<u8>) -> BackendResult<SegmentId> {
        self.reserve(bytes.len() as u64)?;
        let id = self.next_handle(Locality::Cpu);
        self.segments.insert(
            id.clone(),
            Segment {
                locality: Locality::Cpu,
                bytes,
            },
        );
        Ok(id)
    }

    /// Register bytes under a caller-chosen name
    pub fn insert_named(&self, id: SegmentId, locality: Locality, bytes: Vec<u8>) {
        self.segments.insert(id, Segment { locality, bytes });
    }

    pub fn read_segment(&self, handle: &SegmentId) -> Option<Vec<u8>> {
        self.segments.get(handle).map(|s| s.bytes.clone())
    }

    pub fn locality_of(&self, handle: &SegmentId) -> Option<Locality> {
        self.segments.get(handle).map(|s| s.locality)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.bytes.len() as u64).sum()
    }

    fn reserve(&self, requested: u64) -> BackendResult<()> {
        match self.limit {
            Some(limit) if self.allocated_bytes().saturating_add(requested) > limit => {
                Err(BackendError::OutOfMemory { requested })
            }
            _ => Ok(()),
        }
    }

    fn next_handle(&self, locality: Locality) -> SegmentId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        match locality {
            Locality::Cpu => SegmentId::new(format!("psm_{:08x}", n)),
            Locality::Gpu { device_id } => SegmentId::new(format!("dev{}_{:08x}", device_id, n)),
        }
    }
}

impl MemoryBackend for HeapBackend {
    fn allocate(&self, locality: Locality, size: u64) -> BackendResult<SegmentId> {
        self.reserve(size)?;
        let len = usize::try_from(size).map_err(|_| BackendError::OutOfMemory { requested: size })?;
        let id = self.next_handle(locality);
        self.segments.insert(
            id.clone(),
            Segment {
                locality,
                bytes: vec![0; len],
            },
        );
        Ok(id)
    }

    fn copy_in(&self, dst: &SegmentId, src: &SegmentId) -> BackendResult<()> {
        let bytes = self
            .read_segment(src)
            .ok_or_else(|| BackendError::UnknownSegment {
                handle: src.to_string(),
            })?;
        let mut target = self
            .segments
            .get_mut(dst)
            .ok_or_else(|| BackendError::UnknownSegment {
                handle: dst.to_string(),
            })?;
        if target.bytes.len() != bytes.len() {
            return Err(BackendError::SizeMismatch {
                handle: src.to_string(),
                expected: target.bytes.len() as u64,
                actual: bytes.len() as u64,
            });
        }
        target.bytes.copy_from_slice(&bytes);
        Ok(())
    }

    fn free(&self, handle: &SegmentId) -> BackendResult<()> {
        self.segments
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| BackendError::UnknownSegment {
                handle: handle.to_string(),
            })
    }

    fn contains(&self, handle: &SegmentId) -> bool {
        self.segments.contains_key(handle)
    }
}
