use std::sync::Arc;

use tracing::debug;

use crate::backend::Backend;
use crate::config::StorageConfig;
use crate::device::Device;
use crate::error::{Error, ErrorKind, Result, ResultExt};

/// Entry point for discovering devices on one host.
#[derive(Debug, Clone)]
pub struct Storage {
    backend: Arc<dyn Backend>,
    config: StorageConfig,
}

impl Storage {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, StorageConfig::default())
    }

    pub fn with_config(backend: Arc<dyn Backend>, config: StorageConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Finds devices with partitions detected.
    ///
    /// An empty `device_id` matches all disks. Devices smaller than
    /// `min_size` are dropped, as are devices larger than `max_size` unless
    /// it is 0. With `removable_only`, fixed disks are dropped too.
    pub fn search(
        &self,
        device_id: &str,
        min_size: u64,
        max_size: u64,
        removable_only: bool,
    ) -> Result<Vec<Device>> {
        let probed = self.backend.probe(device_id).kind_context(ErrorKind::Detection, || {
            format!("probing {}", if device_id.is_empty() { "all disks" } else { device_id })
        })?;
        if probed.is_empty() && !device_id.is_empty() {
            return Err(Error::with_source(
                ErrorKind::Detection,
                format!("probing {device_id}"),
                Error::new(ErrorKind::Empty, "no device matched"),
            ));
        }

        let mut devices = Vec::new();
        for info in probed {
            if info.size < min_size || (max_size != 0 && info.size > max_size) {
                debug!(device = %info.id, size = info.size, "outside size bounds");
                continue;
            }
            if removable_only && !info.removable {
                debug!(device = %info.id, "not removable");
                continue;
            }
            let mut device = Device::from_info(info, Arc::clone(&self.backend));
            device
                .detect_partitions(self.config.assign_access_paths_on_search)
                .kind_context(ErrorKind::Detection, || {
                    format!("detecting partitions of {}", device.identifier())
                })?;
            devices.push(device);
        }
        debug!(backend = self.backend.name(), count = devices.len(), "search complete");
        Ok(devices)
    }

    /// Returns the one device named `device_id`.
    pub fn open(&self, device_id: &str) -> Result<Device> {
        if device_id.is_empty() {
            return Err(Error::new(ErrorKind::Input, "device identifier was empty"));
        }
        let mut devices = self.search(device_id, 0, 0, false)?;
        match devices.len() {
            0 => Err(Error::new(ErrorKind::Detection, format!("no device {device_id}"))),
            1 => Ok(devices.remove(0)),
            n => Err(Error::new(
                ErrorKind::NoMatch,
                format!("{n} devices matched {device_id}"),
            )),
        }
    }
}
