//! Core cache bookkeeping
//!
//! - Entry table and hit-count buckets
//! - Eviction policy and advisory lock set
//! - Command messages and the single-writer manager loop
//! - Client handle and read-only replica
//! - Memory backends

pub mod backend;
pub mod client;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod hit_index;
pub mod lock_set;
pub mod manager;
pub mod message;
pub mod naming;
pub mod replica;

pub use backend::{HeapBackend, MemoryBackend};
pub use client::{CacheClient, ObjectDescriptor};
pub use entry::{CacheEntry, EntryTable, Locality, PutOutcome, SegmentId, SharedKind};
pub use error::{BackendError, BackendResult, CacheError, CacheResult};
pub use eviction::{make_room, EvictionOutcome};
pub use hit_index::HitBucketIndex;
pub use lock_set::LockSet;
pub use manager::{CacheManager, CacheState, CacheSummary, LoopState, ManagerExit, Response};
pub use message::{Action, CacheMessage, Envelope};
pub use naming::entry_key;
pub use replica::EntryReplica;
