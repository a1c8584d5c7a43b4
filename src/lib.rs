pub mod config;
pub mod core;
pub mod observability;

pub use crate::{
    config::{CacheConfig, CacheConfigBuilder, ConfigError},
    core::{CacheClient, CacheError, CacheManager, CacheMessage, HeapBackend, ManagerExit},
};
