//! Host-independent model and state machine for removable block storage.
//!
//! A [`Storage`] probes through a [`Backend`] and hands out [`Device`]
//! values that wipe, partition, dismount and eject. Each [`Partition`]
//! formats, mounts and manages its files.

pub mod backend;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod layout;
pub mod model;
pub mod partition;
pub mod search;

#[cfg(test)]
mod testing;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

pub use backend::Backend;
pub use command::{CommandOutput, CommandRunner, ScriptedRunner, SystemRunner};
pub use config::{ErrorAction, LinuxConfig, StorageConfig, WindowsConfig};
pub use device::{Device, PartitionRequest};
pub use error::{Error, ErrorKind, Result, ResultExt};
pub use model::{DeviceInfo, FileSystem, PartitionInfo, PartitionStyle};
pub use partition::{is_vacant_dir, FormatOptions, Partition};
pub use search::Storage;

pub const INVENTORY_SCHEMA_VERSION: &str = "1.0.0";

/// Serializable snapshot of a search, for reports and `--json` output.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Inventory {
    pub schema_version: String,
    pub backend: String,
    pub devices: Vec<DeviceEntry>,
    pub generated_at_utc: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeviceEntry {
    pub friendly_name: String,
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub partitions: Vec<PartitionInfo>,
}

impl Inventory {
    pub fn new(backend: &str, devices: &[Device]) -> Self {
        Self {
            schema_version: INVENTORY_SCHEMA_VERSION.to_string(),
            backend: backend.to_string(),
            devices: devices.iter().map(DeviceEntry::from).collect(),
            generated_at_utc: now_utc_rfc3339(),
        }
    }
}

impl From<&Device> for DeviceEntry {
    fn from(device: &Device) -> Self {
        Self {
            friendly_name: device.friendly_name(),
            info: device.info().clone(),
            partitions: device.partitions().iter().map(|p| p.info().clone()).collect(),
        }
    }
}

pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use testing::FakeBackend;

    #[test]
    fn inventory_serializes_flat_device_fields() {
        let info = DeviceInfo {
            id: "disk2".to_string(),
            path: "/dev/disk2".to_string(),
            removable: true,
            size: 16_000_000_000,
            make: "Kingston".to_string(),
            ..Default::default()
        };
        let backend = Arc::new(FakeBackend::new().with_disk(info.clone(), vec![]));
        let devices = Storage::new(backend).search("", 0, 0, false).unwrap();

        let inventory = Inventory::new("fake", &devices);
        let value = serde_json::to_value(&inventory).unwrap();
        assert_eq!(value["backend"], "fake");
        assert_eq!(value["devices"][0]["id"], "disk2");
        assert_eq!(value["devices"][0]["friendly_name"], "Kingston");
        assert!(value["devices"][0]["partitions"].as_array().unwrap().is_empty());
        assert!(inventory.generated_at_utc.ends_with('Z'));
    }
}
