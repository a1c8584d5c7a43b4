use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigResult;
use crate::core::Locality;

/// Cache manager configuration, consumed once at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Name used in log lines
    #[serde(default = "default_process_name")]
    pub process_name: String,
    /// Host memory ceiling in bytes
    pub cpu_capacity_bytes: u64,
    #[serde(default)]
    pub gpu_devices: Vec<GpuDeviceConfig>,
    /// Collect GET/PUT profiling counters
    #[serde(default)]
    pub profiling: bool,
    /// Where profiler output is written; required when profiling
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// One GPU the cache may place entries on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GpuDeviceConfig {
    pub device_id: u32,
    /// e.g. `0000:3b:00.0`
    pub pci_bus_id: String,
    pub capacity_bytes: u64,
}

fn default_process_name() -> String {
    "cache-manager".to_string()
}

fn default_cpu_capacity_bytes() -> u64 {
    1024 * 1024 * 1024 // 1GB
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            process_name: default_process_name(),
            cpu_capacity_bytes: default_cpu_capacity_bytes(),
            gpu_devices: Vec::new(),
            profiling: false,
            log_dir: None,
        }
    }
}

impl CacheConfig {
    pub fn new(cpu_capacity_bytes: u64) -> Self {
        Self {
            cpu_capacity_bytes,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: CacheConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        crate::config::validation::ConfigValidator::validate(self)
    }

    /// Capacity ceiling for a locality, `None` for an unconfigured device
    pub fn capacity_for(&self, locality: Locality) -> Option<u64> {
        match locality {
            Locality::Cpu => Some(self.cpu_capacity_bytes),
            Locality::Gpu { device_id } => self
                .gpu_devices
                .iter()
                .find(|d| d.device_id == device_id)
                .map(|d| d.capacity_bytes),
        }
    }

    pub fn device_for_pci(&self, pci_bus_id: &str) -> Option<&GpuDeviceConfig> {
        self.gpu_devices
            .iter()
            .find(|d| d.pci_bus_id.eq_ignore_ascii_case(pci_bus_id))
    }

    /// Combined capacity across host and all devices
    pub fn total_capacity_bytes(&self) -> u64 {
        self.gpu_devices
            .iter()
            .fold(self.cpu_capacity_bytes, |acc, d| {
                acc.saturating_add(d.capacity_bytes)
            })
    }
}
