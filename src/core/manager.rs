//! Cache manager: the single writer of all cache bookkeeping
//!
//! [`CacheState`] owns the entry table, the lock set and the profiler, and
//! applies one [`CacheMessage`] at a time. [`CacheManager`] wraps it in a
//! command loop fed by an unbounded queue. Any error ends the loop; clients
//! then see every lookup as a miss.

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{
    backend::MemoryBackend,
    client::CacheClient,
    entry::{CacheEntry, EntryTable, Locality, SegmentId, SharedKind},
    error::{CacheError, CacheResult},
    eviction::make_room,
    lock_set::LockSet,
    message::{CacheMessage, Envelope},
    naming::entry_key,
    replica::EntryReplica,
};
use crate::{
    config::{CacheConfig, ConfigResult},
    observability::profiler::CacheProfiler,
};

/// What the loop should do after a message was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    None,
    Answer(bool),
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Terminated,
}

/// Occupancy reported when the loop stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheSummary {
    pub entries: usize,
    pub max_size: u64,
    pub used_size: u64,
}

/// Why the command loop stopped
#[derive(Debug)]
pub enum ManagerExit {
    /// QUIT received
    Quit(CacheSummary),
    /// Every client handle was dropped
    Disconnected(CacheSummary),
    /// A message could not be applied
    Failed(CacheError),
}

impl ManagerExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, ManagerExit::Failed(_))
    }
}

/// Object metadata shared by PUT and PUT_GPU
struct Insert<'a> {
    handle: SegmentId,
    kind: SharedKind,
    size: u64,
    dtype: &'a str,
    shape: &'a [usize],
}

pub struct CacheState {
    config: CacheConfig,
    table: EntryTable,
    locks: LockSet,
    replica: EntryReplica,
    backend: Arc<dyn MemoryBackend>,
    profiler: Option<CacheProfiler>,
}

impl std::fmt::Debug for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheState")
            .field("process", &self.config.process_name)
            .field("entries", &self.table.len())
            .field("locked", &self.locks.len())
            .finish()
    }
}

impl CacheState {
    pub fn new(config: CacheConfig, backend: Arc<dyn MemoryBackend>, replica: EntryReplica) -> Self {
        let profiler = config.profiling.then(CacheProfiler::new);
        Self {
            config,
            table: EntryTable::new(),
            locks: LockSet::new(),
            replica,
            backend,
            profiler,
        }
    }

    pub fn handle(&mut self, message: CacheMessage) -> CacheResult<Response> {
        match message {
            CacheMessage::Get {
                file_name,
                parameter,
                function,
            } => {
                self.get(&file_name, &parameter, &function);
                Ok(Response::None)
            }
            CacheMessage::Put {
                file_name,
                handle,
                kind,
                parameter,
                function,
                size,
                dtype,
                shape,
            } => {
                let insert = Insert {
                    handle,
                    kind,
                    size,
                    dtype: &dtype,
                    shape: &shape,
                };
                self.put(&file_name, insert, &parameter, &function)?;
                Ok(Response::None)
            }
            CacheMessage::PutGpu {
                file_name,
                handle,
                pci_bus_id,
                parameter,
                function,
                size,
                dtype,
                shape,
            } => {
                let insert = Insert {
                    handle,
                    kind: SharedKind::DeviceBuffer,
                    size,
                    dtype: &dtype,
                    shape: &shape,
                };
                self.put_gpu(&file_name, &pci_bus_id, insert, &parameter, &function)?;
                Ok(Response::None)
            }
            CacheMessage::Replace {
                file_name,
                handle,
                kind,
                parameter,
                function,
                size,
                dtype,
                shape,
            } => {
                let insert = Insert {
                    handle,
                    kind,
                    size,
                    dtype: &dtype,
                    shape: &shape,
                };
                self.replace(&file_name, insert, &parameter, &function)?;
                Ok(Response::None)
            }
            CacheMessage::Remove { file_name } => {
                self.remove(&file_name)?;
                Ok(Response::None)
            }
            CacheMessage::Lock { file_name } => {
                self.lock(&file_name)?;
                Ok(Response::None)
            }
            CacheMessage::Unlock { file_name } => {
                self.unlock(&file_name)?;
                Ok(Response::None)
            }
            CacheMessage::IsLocked { file_name } => {
                Ok(Response::Answer(self.is_locked(&file_name)))
            }
            CacheMessage::IsInCache { file_name } => {
                Ok(Response::Answer(self.is_in_cache(&file_name)))
            }
            CacheMessage::EndProfiling => {
                self.end_profiling()?;
                Ok(Response::None)
            }
            CacheMessage::Quit => {
                self.log_status();
                Ok(Response::Terminate)
            }
        }
    }

    fn get(&mut self, file_name: &str, parameter: &str, function: &str) {
        let name = entry_key(file_name);
        let Some(hits) = self.table.record_hit(&name) else {
            debug!(process = %self.config.process_name, file_name = %name, "Cache miss");
            return;
        };
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_get(function, parameter, &name);
        }
        self.replica.set_hits(&name, hits);
        debug!(process = %self.config.process_name, file_name = %name, hits, "Cache hit");
    }

    fn put(
        &mut self,
        file_name: &str,
        insert: Insert<'_>,
        parameter: &str,
        function: &str,
    ) -> CacheResult<()> {
        let name = entry_key(file_name);
        // A rejected duplicate leaves its segment with the producer
        if self.table.contains(&name) {
            debug!(
                process = %self.config.process_name,
                file_name = %name,
                handle = %insert.handle,
                "The object already exists, not adding"
            );
            return Ok(());
        }
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_put(function, parameter, &name);
        }
        self.insert(name, Locality::Cpu, insert)
    }

    fn put_gpu(
        &mut self,
        file_name: &str,
        pci_bus_id: &str,
        insert: Insert<'_>,
        parameter: &str,
        function: &str,
    ) -> CacheResult<()> {
        let device_id = self
            .config
            .device_for_pci(pci_bus_id)
            .map(|d| d.device_id)
            .ok_or_else(|| CacheError::UnknownDevice {
                pci_bus_id: pci_bus_id.to_string(),
            })?;
        let name = entry_key(file_name);
        if self.table.contains(&name) {
            debug!(
                process = %self.config.process_name,
                file_name = %name,
                device_id,
                "The object already exists, not adding"
            );
            return Ok(());
        }
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.record_put(function, parameter, &name);
        }
        self.insert(name, Locality::Gpu { device_id }, insert)
    }

    fn insert(&mut self, name: String, locality: Locality, insert: Insert<'_>) -> CacheResult<()> {
        let capacity = self.capacity(locality)?;
        let used = self.table.total_bytes(locality);

        if used.saturating_add(insert.size) > capacity {
            let outcome = make_room(&mut self.table, &self.locks, locality, insert.size, capacity);
            for entry in &outcome.evicted {
                self.release(entry)?;
            }
            let used = self.table.total_bytes(locality);
            if used.saturating_add(insert.size) > capacity {
                warn!(
                    process = %self.config.process_name,
                    file_name = %name,
                    %locality,
                    used_bytes = used,
                    requested_bytes = insert.size,
                    capacity_bytes = capacity,
                    "Cache over capacity after eviction, inserting anyway"
                );
            }
        }

        let used = self.table.total_bytes(locality);
        if used.checked_add(insert.size).is_none() {
            return Err(CacheError::SizeOverflow {
                name,
                locality: locality.to_string(),
                used,
                requested: insert.size,
            });
        }

        // Device entries live in a buffer owned by the cache, copied from the source
        let handle = match locality {
            Locality::Cpu => insert.handle,
            Locality::Gpu { .. } => {
                let buffer = self.backend.allocate(locality, insert.size)?;
                self.backend.copy_in(&buffer, &insert.handle)?;
                buffer
            }
        };

        let entry = CacheEntry::new(name, handle, insert.size, locality)
            .with_layout(insert.shape.to_vec(), insert.dtype)
            .with_kind(insert.kind);
        debug!(
            process = %self.config.process_name,
            file_name = %entry.name,
            handle = %entry.handle,
            size = entry.size_bytes,
            %locality,
            "Cache add entry"
        );
        self.replica.publish(&entry);
        self.table.put(entry);
        Ok(())
    }

    /// Presence is decided here, so a REMOVE still in the queue is harmless
    fn replace(
        &mut self,
        file_name: &str,
        insert: Insert<'_>,
        parameter: &str,
        function: &str,
    ) -> CacheResult<()> {
        let name = entry_key(file_name);
        if self.table.contains(&name) {
            self.remove(&name)?;
        }
        self.put(&name, insert, parameter, function)
    }

    fn remove(&mut self, file_name: &str) -> CacheResult<()> {
        let name = entry_key(file_name);
        debug!(process = %self.config.process_name, file_name = %name, "Removing");
        if self.locks.is_locked(&name) {
            return Err(CacheError::RemoveLocked { name });
        }
        let entry = self.table.remove(&name)?;
        self.release(&entry)
    }

    fn lock(&mut self, file_name: &str) -> CacheResult<()> {
        let name = entry_key(file_name);
        if !self.table.contains(&name) {
            return Err(CacheError::LockUnknownEntry { name });
        }
        self.locks.lock(&name)?;
        debug!(process = %self.config.process_name, file_name = %name, "Locking");
        Ok(())
    }

    fn unlock(&mut self, file_name: &str) -> CacheResult<()> {
        let name = entry_key(file_name);
        debug!(process = %self.config.process_name, file_name = %name, "Unlocking");
        self.locks.unlock(&name)
    }

    pub fn is_locked(&self, file_name: &str) -> bool {
        self.locks.is_locked(&entry_key(file_name))
    }

    pub fn is_in_cache(&self, file_name: &str) -> bool {
        self.table.contains(&entry_key(file_name))
    }

    fn end_profiling(&self) -> CacheResult<()> {
        match (&self.profiler, &self.config.log_dir) {
            (Some(profiler), Some(log_dir)) => profiler.flush(log_dir).map(|_| ()),
            _ => {
                debug!(process = %self.config.process_name, "Profiling disabled, nothing to flush");
                Ok(())
            }
        }
    }

    /// Drop the segment behind an entry that left the table
    fn release(&self, entry: &CacheEntry) -> CacheResult<()> {
        self.replica.retract(&entry.name);
        if !self.backend.contains(&entry.handle) {
            warn!(
                process = %self.config.process_name,
                file_name = %entry.name,
                handle = %entry.handle,
                "Segment already released"
            );
            return Ok(());
        }
        self.backend.free(&entry.handle)?;
        Ok(())
    }

    fn capacity(&self, locality: Locality) -> CacheResult<u64> {
        self.config
            .capacity_for(locality)
            .ok_or(CacheError::UnconfiguredDevice {
                device_id: locality.device_id().unwrap_or_default(),
            })
    }

    pub fn used_bytes(&self, locality: Locality) -> u64 {
        self.table.total_bytes(locality)
    }

    pub fn entry(&self, file_name: &str) -> Option<&CacheEntry> {
        self.table.get(&entry_key(file_name))
    }

    pub fn summary(&self) -> CacheSummary {
        CacheSummary {
            entries: self.table.len(),
            max_size: self.config.total_capacity_bytes(),
            used_size: self
                .table
                .iter()
                .fold(0u64, |acc, e| acc.saturating_add(e.size_bytes)),
        }
    }

    pub fn profiler(&self) -> Option<&CacheProfiler> {
        self.profiler.as_ref()
    }

    fn log_status(&self) {
        let process = &self.config.process_name;
        debug!(process = %process, "Cache hits status:");
        for (hits, names) in self.table.hit_buckets().buckets_ascending() {
            debug!(process = %process, "{} hits:", hits);
            for name in names {
                let size = self.table.get(name).map(|e| e.size_bytes).unwrap_or(0);
                debug!(process = %process, "\t- {} {}", name, size);
            }
        }
        let summary = self.summary();
        info!(
            process = %process,
            entries = summary.entries,
            max_size = summary.max_size,
            used_size = summary.used_size,
            "Stopping cache manager"
        );
    }
}

pub struct CacheManager {
    state: CacheState,
    rx: mpsc::UnboundedReceiver<Envelope>,
    loop_state: LoopState,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("state", &self.state)
            .field("loop_state", &self.loop_state)
            .finish()
    }
}

impl CacheManager {
    /// Build a manager and the client handle that feeds it
    pub fn new(
        config: CacheConfig,
        backend: Arc<dyn MemoryBackend>,
    ) -> ConfigResult<(Self, CacheClient)> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let replica = EntryReplica::new();

        debug!(
            process = %config.process_name,
            cpu_capacity = config.cpu_capacity_bytes,
            gpu_devices = config.gpu_devices.len(),
            profiling = config.profiling,
            "Starting cache manager"
        );

        let client = CacheClient::new(tx, replica.clone());
        let manager = Self {
            state: CacheState::new(config, backend, replica),
            rx,
            loop_state: LoopState::Running,
        };
        Ok((manager, client))
    }

    /// Start the command loop on the current tokio runtime
    pub fn spawn(
        config: CacheConfig,
        backend: Arc<dyn MemoryBackend>,
    ) -> ConfigResult<(CacheClient, JoinHandle<ManagerExit>)> {
        let (manager, client) = Self::new(config, backend)?;
        let handle = tokio::spawn(manager.run());
        Ok((client, handle))
    }

    pub async fn run(mut self) -> ManagerExit {
        while self.loop_state == LoopState::Running {
            let Some(envelope) = self.rx.recv().await else {
                self.loop_state = LoopState::Terminated;
                info!(
                    process = %self.state.config.process_name,
                    "All cache clients gone, stopping cache manager"
                );
                return ManagerExit::Disconnected(self.state.summary());
            };

            if let Err(e) = self.dispatch(envelope) {
                self.loop_state = LoopState::Terminated;
                return ManagerExit::Failed(e);
            }
        }
        ManagerExit::Quit(self.state.summary())
    }

    fn dispatch(&mut self, envelope: Envelope) -> CacheResult<()> {
        let Envelope { message, reply } = envelope;
        let action = message.action();
        let file_name = message.file_name().unwrap_or_default().to_string();

        match self.state.handle(message) {
            Ok(Response::None) => Ok(()),
            Ok(Response::Answer(answer)) => {
                debug!(
                    process = %self.state.config.process_name,
                    %action,
                    file_name = %file_name,
                    answer,
                    "Query answered"
                );
                match reply {
                    Some(tx) => {
                        // Receiver may have given up already
                        let _ = tx.send(answer);
                    }
                    None => warn!(%action, file_name = %file_name, "Query without reply channel"),
                }
                Ok(())
            }
            Ok(Response::Terminate) => {
                self.loop_state = LoopState::Terminated;
                Ok(())
            }
            Err(e) => {
                error!(
                    process = %self.state.config.process_name,
                    %action,
                    file_name = %file_name,
                    coherence = e.is_coherence(),
                    "Exception {}",
                    e
                );
                Err(e)
            }
        }
    }
}
