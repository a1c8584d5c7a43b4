use std::collections::HashSet;

use super::{CacheConfig, ConfigError, ConfigResult};

pub(crate) struct ConfigValidator;

impl ConfigValidator {
    pub(crate) fn validate(config: &CacheConfig) -> ConfigResult<()> {
        if config.cpu_capacity_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cpu_capacity_bytes".to_string(),
                value: "0".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if config.process_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "process_name".to_string(),
                value: config.process_name.clone(),
                reason: "Must not be empty".to_string(),
            });
        }

        Self::validate_devices(config)?;

        if config.profiling && config.log_dir.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "log_dir".to_string(),
            });
        }

        Ok(())
    }

    fn validate_devices(config: &CacheConfig) -> ConfigResult<()> {
        let mut ids = HashSet::new();
        let mut buses = HashSet::new();

        for device in &config.gpu_devices {
            if device.capacity_bytes == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "gpu_devices.capacity_bytes".to_string(),
                    value: format!("device {}: 0", device.device_id),
                    reason: "Must be greater than 0".to_string(),
                });
            }
            if device.pci_bus_id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "gpu_devices.pci_bus_id".to_string(),
                    value: format!("device {}", device.device_id),
                    reason: "Must not be empty".to_string(),
                });
            }
            if !ids.insert(device.device_id) {
                return Err(ConfigError::ValidationFailed {
                    reason: format!("Duplicate GPU device id {}", device.device_id),
                });
            }
            if !buses.insert(device.pci_bus_id.to_ascii_lowercase()) {
                return Err(ConfigError::ValidationFailed {
                    reason: format!("Duplicate PCI bus id {}", device.pci_bus_id),
                });
            }
        }

        Ok(())
    }
}
