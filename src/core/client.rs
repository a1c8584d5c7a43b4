//! Producer-side handle to the cache manager
//!
//! Mutations are fire-and-forget; queries wait for their own reply. Once the
//! manager has stopped, every call behaves like a cache miss so callers fall
//! back to reading the backing file.

use tokio::sync::mpsc;
use tracing::debug;

use super::{
    entry::{CacheEntry, SegmentId, SharedKind},
    message::{CacheMessage, Envelope},
    naming::entry_key,
    replica::EntryReplica,
};

/// Description of an object a producer has placed in a segment
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescriptor {
    pub handle: SegmentId,
    pub kind: SharedKind,
    pub size: u64,
    pub dtype: String,
    pub shape: Vec<usize>,
}

impl ObjectDescriptor {
    /// Typed array stored in a shared-memory segment
    pub fn array(handle: SegmentId, size: u64, dtype: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            handle,
            kind: SharedKind::SharedMemory,
            size,
            dtype: dtype.into(),
            shape,
        }
    }

    /// Untyped collection (list, tuple or dict)
    pub fn collection(handle: SegmentId, kind: SharedKind, size: u64) -> Self {
        Self {
            handle,
            kind,
            size,
            dtype: String::new(),
            shape: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheClient {
    tx: mpsc::UnboundedSender<Envelope>,
    replica: EntryReplica,
}

impl CacheClient {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>, replica: EntryReplica) -> Self {
        Self { tx, replica }
    }

    /// Queue a message without waiting. Returns false if the manager is gone.
    pub fn submit(&self, message: CacheMessage) -> bool {
        let action = message.action();
        match self.tx.send(Envelope::notify(message)) {
            Ok(()) => true,
            Err(_) => {
                debug!(%action, "Cache manager unavailable, dropping message");
                false
            }
        }
    }

    /// Send a query and wait for its answer; `false` if the manager is gone.
    pub async fn query(&self, message: CacheMessage) -> bool {
        let action = message.action();
        let (envelope, rx) = Envelope::query(message);
        if self.tx.send(envelope).is_err() {
            debug!(%action, "Cache manager unavailable, treating query as miss");
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub fn put(&self, file_name: &str, object: ObjectDescriptor, parameter: &str, function: &str) -> bool {
        self.submit(CacheMessage::Put {
            file_name: entry_key(file_name),
            handle: object.handle,
            kind: object.kind,
            parameter: parameter.to_string(),
            function: function.to_string(),
            size: object.size,
            dtype: object.dtype,
            shape: object.shape,
        })
    }

    /// Ask the manager to copy `object` onto the GPU at `pci_bus_id`
    pub fn put_gpu(
        &self,
        file_name: &str,
        object: ObjectDescriptor,
        pci_bus_id: &str,
        parameter: &str,
        function: &str,
    ) -> bool {
        self.submit(CacheMessage::PutGpu {
            file_name: entry_key(file_name),
            handle: object.handle,
            pci_bus_id: pci_bus_id.to_string(),
            parameter: parameter.to_string(),
            function: function.to_string(),
            size: object.size,
            dtype: object.dtype,
            shape: object.shape,
        })
    }

    /// Look an entry up in the replica and count the hit with the manager.
    pub fn get(&self, file_name: &str, parameter: &str, function: &str) -> Option<CacheEntry> {
        if self.tx.is_closed() {
            return None;
        }
        let name = entry_key(file_name);
        let entry = self.replica.get(&name)?;
        self.submit(CacheMessage::Get {
            file_name: name,
            parameter: parameter.to_string(),
            function: function.to_string(),
        });
        Some(entry)
    }

    pub fn remove(&self, file_name: &str) -> bool {
        self.submit(CacheMessage::Remove {
            file_name: entry_key(file_name),
        })
    }

    /// Swap the cached copy of `file_name` for `object`, or insert it if absent
    pub fn replace(
        &self,
        file_name: &str,
        object: ObjectDescriptor,
        parameter: &str,
        function: &str,
    ) -> bool {
        self.submit(CacheMessage::Replace {
            file_name: entry_key(file_name),
            handle: object.handle,
            kind: object.kind,
            parameter: parameter.to_string(),
            function: function.to_string(),
            size: object.size,
            dtype: object.dtype,
            shape: object.shape,
        })
    }

    pub fn lock(&self, file_name: &str) -> bool {
        self.submit(CacheMessage::Lock {
            file_name: entry_key(file_name),
        })
    }

    pub fn unlock(&self, file_name: &str) -> bool {
        self.submit(CacheMessage::Unlock {
            file_name: entry_key(file_name),
        })
    }

    pub async fn is_locked(&self, file_name: &str) -> bool {
        self.query(CacheMessage::IsLocked {
            file_name: entry_key(file_name),
        })
        .await
    }

    pub async fn is_in_cache(&self, file_name: &str) -> bool {
        self.query(CacheMessage::IsInCache {
            file_name: entry_key(file_name),
        })
        .await
    }

    /// Presence check against the replica only; may be stale
    pub fn in_cache_hint(&self, file_name: &str) -> bool {
        !self.tx.is_closed() && self.replica.contains(&entry_key(file_name))
    }

    pub fn end_profiling(&self) -> bool {
        self.submit(CacheMessage::EndProfiling)
    }

    pub fn quit(&self) -> bool {
        self.submit(CacheMessage::Quit)
    }

    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn replica(&self) -> &EntryReplica {
        &self.replica
    }
}
