//! Commands accepted by the cache manager
//!
//! Each action is one variant carrying typed fields. Messages serialize with
//! an `"action"` tag so command scripts can be written as JSON lines.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::entry::{SegmentId, SharedKind};

/// Action tag of a [`CacheMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Get,
    Put,
    PutGpu,
    Replace,
    Remove,
    Lock,
    Unlock,
    IsLocked,
    IsInCache,
    EndProfiling,
    Quit,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Get => "GET",
            Action::Put => "PUT",
            Action::PutGpu => "PUT_GPU",
            Action::Replace => "REPLACE",
            Action::Remove => "REMOVE",
            Action::Lock => "LOCK",
            Action::Unlock => "UNLOCK",
            Action::IsLocked => "IS_LOCKED",
            Action::IsInCache => "IS_IN_CACHE",
            Action::EndProfiling => "END_PROFILING",
            Action::Quit => "QUIT",
        }
    }

    /// Queries are answered with a boolean
    pub fn is_query(&self) -> bool {
        matches!(self, Action::IsLocked | Action::IsInCache)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheMessage {
    Get {
        file_name: String,
        #[serde(default)]
        parameter: String,
        #[serde(default)]
        function: String,
    },
    Put {
        file_name: String,
        handle: SegmentId,
        #[serde(default)]
        kind: SharedKind,
        #[serde(default)]
        parameter: String,
        #[serde(default)]
        function: String,
        size: u64,
        #[serde(default)]
        dtype: String,
        #[serde(default)]
        shape: Vec<usize>,
    },
    PutGpu {
        file_name: String,
        /// Source buffer to copy from
        handle: SegmentId,
        pci_bus_id: String,
        #[serde(default)]
        parameter: String,
        #[serde(default)]
        function: String,
        size: u64,
        #[serde(default)]
        dtype: String,
        #[serde(default)]
        shape: Vec<usize>,
    },
    /// Drop the cached copy if there is one, then insert like PUT
    Replace {
        file_name: String,
        handle: SegmentId,
        #[serde(default)]
        kind: SharedKind,
        #[serde(default)]
        parameter: String,
        #[serde(default)]
        function: String,
        size: u64,
        #[serde(default)]
        dtype: String,
        #[serde(default)]
        shape: Vec<usize>,
    },
    Remove {
        file_name: String,
    },
    Lock {
        file_name: String,
    },
    Unlock {
        file_name: String,
    },
    IsLocked {
        file_name: String,
    },
    IsInCache {
        file_name: String,
    },
    EndProfiling,
    Quit,
}

impl CacheMessage {
    pub fn action(&self) -> Action {
        match self {
            CacheMessage::Get { .. } => Action::Get,
            CacheMessage::Put { .. } => Action::Put,
            CacheMessage::PutGpu { .. } => Action::PutGpu,
            CacheMessage::Replace { .. } => Action::Replace,
            CacheMessage::Remove { .. } => Action::Remove,
            CacheMessage::Lock { .. } => Action::Lock,
            CacheMessage::Unlock { .. } => Action::Unlock,
            CacheMessage::IsLocked { .. } => Action::IsLocked,
            CacheMessage::IsInCache { .. } => Action::IsInCache,
            CacheMessage::EndProfiling => Action::EndProfiling,
            CacheMessage::Quit => Action::Quit,
        }
    }

    /// File name the message refers to, if any
    pub fn file_name(&self) -> Option<&str> {
        match self {
            CacheMessage::Get { file_name, .. }
            | CacheMessage::Put { file_name, .. }
            | CacheMessage::PutGpu { file_name, .. }
            | CacheMessage::Replace { file_name, .. }
            | CacheMessage::Remove { file_name }
            | CacheMessage::Lock { file_name }
            | CacheMessage::Unlock { file_name }
            | CacheMessage::IsLocked { file_name }
            | CacheMessage::IsInCache { file_name } => Some(file_name),
            CacheMessage::EndProfiling | CacheMessage::Quit => None,
        }
    }
}

/// A message plus the channel its answer goes back on
#[derive(Debug)]
pub struct Envelope {
    pub message: CacheMessage,
    pub reply: Option<oneshot::Sender<bool>>,
}

impl Envelope {
    pub fn notify(message: CacheMessage) -> Self {
        Self {
            message,
            reply: None,
        }
    }

    pub fn query(message: CacheMessage) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                reply: Some(tx),
            },
            rx,
        )
    }
}
