use std::path::PathBuf;

use super::{CacheConfig, ConfigResult, GpuDeviceConfig};

/// Builder for CacheConfig that wraps the config itself
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: CacheConfig) -> Self {
        Self { config }
    }

    pub fn process_name(mut self, name: impl Into<String>) -> Self {
        self.config.process_name = name.into();
        self
    }

    // ==================== Capacity ====================

    pub fn cpu_capacity(mut self, bytes: u64) -> Self {
        self.config.cpu_capacity_bytes = bytes;
        self
    }

    pub fn gpu_device(mut self, device_id: u32, pci_bus_id: impl Into<String>, bytes: u64) -> Self {
        self.config.gpu_devices.push(GpuDeviceConfig {
            device_id,
            pci_bus_id: pci_bus_id.into(),
            capacity_bytes: bytes,
        });
        self
    }

    // ==================== Profiling ====================

    pub fn profiling(mut self, enabled: bool) -> Self {
        self.config.profiling = enabled;
        self
    }

    pub fn log_dir<S: Into<PathBuf>>(mut self, dir: Option<S>) -> Self {
        self.config.log_dir = dir.map(Into::into);
        self
    }

    /// Turn profiling on and write its output under `dir`
    pub fn enable_profiling(self, dir: impl Into<PathBuf>) -> Self {
        self.profiling(true).log_dir(Some(dir))
    }

    // ==================== Build ====================

    pub fn build(self) -> ConfigResult<CacheConfig> {
        self.build_with_validation(true)
    }

    pub fn build_unchecked(self) -> CacheConfig {
        self.config
    }

    pub fn build_with_validation(self, validate: bool) -> ConfigResult<CacheConfig> {
        let config = self.config;
        if validate {
            config.validate()?;
        }
        Ok(config)
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    pub fn to_builder(&self) -> CacheConfigBuilder {
        CacheConfigBuilder::from_config(self.clone())
    }
}
