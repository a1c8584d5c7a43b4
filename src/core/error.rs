//! Error types for the cache manager
//!
//! Every variant is fatal to the command loop. Clients never see these errors
//! directly; they observe a terminated manager and fall back to cache misses.

use std::path::PathBuf;

/// Memory backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Unknown memory segment: {handle}")]
    UnknownSegment { handle: String },

    #[error("Segment {handle} holds {actual} bytes, expected {expected}")]
    SizeMismatch {
        handle: String,
        expected: u64,
        actual: u64,
    },

    #[error("Backend could not allocate {requested} bytes")]
    OutOfMemory { requested: u64 },
}

/// Cache manager errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache coherence issue: tried to lock an already locked entry {name}")]
    AlreadyLocked { name: String },

    #[error("Cache coherence issue: tried to unlock entry {name} which is not locked")]
    NotLocked { name: String },

    #[error("Cache coherence issue: entry {name} is not in the cache")]
    UnknownEntry { name: String },

    #[error("Cache coherence issue: tried to lock entry {name} which is not in the cache")]
    LockUnknownEntry { name: String },

    #[error("Cache coherence issue: tried to remove locked entry {name}")]
    RemoveLocked { name: String },

    #[error("No GPU device configured for PCI bus id {pci_bus_id}")]
    UnknownDevice { pci_bus_id: String },

    #[error("No capacity configured for GPU device {device_id}")]
    UnconfiguredDevice { device_id: u32 },

    #[error("Adding {requested} bytes for {name} overflows the {used} bytes already held on {locality}")]
    SizeOverflow {
        name: String,
        locality: String,
        used: u64,
        requested: u64,
    },

    #[error("Memory backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Failed to write profiler output to {}: {source}", path.display())]
    Profiler {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize profiler output: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// True for violations of the lock/entry invariants
    pub fn is_coherence(&self) -> bool {
        matches!(
            self,
            CacheError::AlreadyLocked { .. }
                | CacheError::NotLocked { .. }
                | CacheError::UnknownEntry { .. }
                | CacheError::LockUnknownEntry { .. }
                | CacheError::RemoveLocked { .. }
        )
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for memory backend operations
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_already_locked_display() {
        let error = CacheError::AlreadyLocked {
            name: "block_0.npy".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Cache coherence issue: tried to lock an already locked entry block_0.npy"
        );
    }

    #[test]
    fn test_not_locked_display() {
        let error = CacheError::NotLocked {
            name: "block_1.npy".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Cache coherence issue: tried to unlock entry block_1.npy which is not locked"
        );
    }

    #[test]
    fn test_coherence_classification() {
        let coherence = [
            CacheError::AlreadyLocked { name: "a".into() },
            CacheError::NotLocked { name: "a".into() },
            CacheError::UnknownEntry { name: "a".into() },
            CacheError::LockUnknownEntry { name: "a".into() },
            CacheError::RemoveLocked { name: "a".into() },
        ];
        assert!(coherence.iter().all(CacheError::is_coherence));

        let other = CacheError::UnknownDevice {
            pci_bus_id: "0000:3b:00.0".into(),
        };
        assert!(!other.is_coherence());
        assert!(!CacheError::UnconfiguredDevice { device_id: 2 }.is_coherence());
    }

    #[test]
    fn test_size_overflow_display() {
        let error = CacheError::SizeOverflow {
            name: "b".into(),
            locality: "cpu".into(),
            used: 8,
            requested: u64::MAX,
        };
        assert_eq!(
            error.to_string(),
            format!("Adding {} bytes for b overflows the 8 bytes already held on cpu", u64::MAX)
        );
        assert!(!error.is_coherence());
    }

    #[test]
    fn test_backend_error_conversion_keeps_message() {
        let error: CacheError = BackendError::UnknownSegment {
            handle: "psm_1234".to_string(),
        }
        .into();
        assert_eq!(
            error.to_string(),
            "Memory backend error: Unknown memory segment: psm_1234"
        );
        assert!(!error.is_coherence());
    }

    #[test]
    fn test_profiler_error_exposes_source() {
        let error = CacheError::Profiler {
            path: PathBuf::from("/nonexistent/cache_profiler.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(error.source().is_some());
        assert!(error
            .to_string()
            .starts_with("Failed to write profiler output to /nonexistent/cache_profiler.json"));
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CacheError>();
        assert_send_sync::<BackendError>();
    }
}
