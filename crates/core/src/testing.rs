use std::collections::HashMap;
use std::sync::Mutex;

use crate::backend::{Backend, Ejector, Formatter, Mounter, PartitionReader, Partitioner, Prober};
use crate::error::{Error, ErrorKind, Result};
use crate::layout::PartitionPlan;
use crate::model::{DeviceInfo, FileSystem, PartitionInfo, PartitionStyle};

/// In-memory disk host used to exercise the state machine.
#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
}

#[derive(Debug, Default)]
struct FakeState {
    devices: Vec<DeviceInfo>,
    partitions: HashMap<String, Vec<PartitionInfo>>,
    labels: HashMap<String, String>,
    pool: Vec<String>,
    occupied: Vec<String>,
    failing: Vec<&'static str>,
    unsupported: Vec<FileSystem>,
    calls: Vec<String>,
    raw_probe: Option<Vec<u8>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disk(self, device: DeviceInfo, partitions: Vec<PartitionInfo>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.partitions.insert(device.id.clone(), partitions);
            state.devices.push(device);
        }
        self
    }

    pub fn with_pool(self, pool: &[&str]) -> Self {
        self.state.lock().unwrap().pool = pool.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_occupied(self, occupied: &[&str]) -> Self {
        self.state.lock().unwrap().occupied = occupied.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_label(self, partition_id: &str, label: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .labels
            .insert(partition_id.to_string(), label.to_string());
        self
    }

    /// Probe output is decoded as a JSON device list, like a real backend.
    pub fn with_raw_probe(self, raw: &[u8]) -> Self {
        self.state.lock().unwrap().raw_probe = Some(raw.to_vec());
        self
    }

    pub fn failing(self, operation: &'static str) -> Self {
        self.state.lock().unwrap().failing.push(operation);
        self
    }

    pub fn without(self, file_system: FileSystem) -> Self {
        self.state.lock().unwrap().unsupported.push(file_system);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutation_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call.as_str(), "probe" | "list_partitions" | "volume_label"))
            .collect()
    }

    fn record(&self, operation: &'static str) -> Result<std::sync::MutexGuard<'_, FakeState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(operation.to_string());
        if state.failing.contains(&operation) {
            return Err(Error::new(ErrorKind::BackendCommand, format!("{operation} failed")));
        }
        Ok(state)
    }
}

impl Prober for FakeBackend {
    fn probe(&self, device_id: &str) -> Result<Vec<DeviceInfo>> {
        let state = self.record("probe")?;
        if let Some(raw) = &state.raw_probe {
            return crate::command::decode_json(raw);
        }
        Ok(state
            .devices
            .iter()
            .filter(|d| device_id.is_empty() || d.id == device_id)
            .cloned()
            .collect())
    }
}

impl PartitionReader for FakeBackend {
    fn list_partitions(&self, device: &DeviceInfo) -> Result<Vec<PartitionInfo>> {
        let state = self.record("list_partitions")?;
        Ok(state.partitions.get(&device.id).cloned().unwrap_or_default())
    }

    fn volume_label(&self, partition: &PartitionInfo) -> Result<Option<String>> {
        let state = self.record("volume_label")?;
        Ok(state.labels.get(&partition.id).cloned())
    }
}

impl Partitioner for FakeBackend {
    fn wipe(&self, device: &DeviceInfo) -> Result<()> {
        let mut state = self.record("wipe")?;
        state.partitions.insert(device.id.clone(), Vec::new());
        Ok(())
    }

    fn convert_to_gpt(&self, device: &DeviceInfo) -> Result<()> {
        let mut state = self.record("convert_to_gpt")?;
        if let Some(d) = state.devices.iter_mut().find(|d| d.id == device.id) {
            d.partition_style = PartitionStyle::Gpt;
        }
        Ok(())
    }

    fn create_partition(&self, device: &DeviceInfo, label: &str, plan: &PartitionPlan) -> Result<()> {
        let mut state = self.record("create_partition")?;
        let size = plan
            .size
            .unwrap_or_else(|| device.size.saturating_sub(plan.offset));
        let id = format!("{}p1", device.id);
        state.partitions.insert(
            device.id.clone(),
            vec![PartitionInfo {
                disk_id: device.id.clone(),
                path: format!("/dev/{id}"),
                id,
                label: label.to_string(),
                size,
                ..Default::default()
            }],
        );
        Ok(())
    }

    fn tracks_mounts(&self) -> bool {
        true
    }
}

impl Formatter for FakeBackend {
    fn supports(&self, file_system: FileSystem) -> bool {
        !self.state.lock().unwrap().unsupported.contains(&file_system)
    }

    fn format(&self, partition: &PartitionInfo, file_system: FileSystem, label: &str) -> Result<()> {
        let mut state = self.record("format")?;
        if let Some(parts) = state.partitions.get_mut(&partition.disk_id) {
            for part in parts.iter_mut().filter(|p| p.id == partition.id) {
                part.file_system = file_system;
                part.label = label.to_string();
            }
        }
        Ok(())
    }
}

impl Mounter for FakeBackend {
    fn free_access_paths(&self, _partition: &PartitionInfo) -> Result<Vec<String>> {
        let state = self.record("free_access_paths")?;
        Ok(state
            .pool
            .iter()
            .filter(|p| !state.occupied.contains(*p))
            .cloned()
            .collect())
    }

    fn access_path_free(&self, access_path: &str) -> Result<bool> {
        let state = self.record("access_path_free")?;
        Ok(!state.occupied.iter().any(|p| p == access_path))
    }

    fn mount(&self, partition: &PartitionInfo, access_path: &str) -> Result<String> {
        let mut state = self.record("mount")?;
        state.occupied.push(access_path.to_string());
        if let Some(parts) = state.partitions.get_mut(&partition.disk_id) {
            for part in parts.iter_mut().filter(|p| p.id == partition.id) {
                part.mount = access_path.to_string();
            }
        }
        Ok(access_path.to_string())
    }

    fn unmount(&self, partition: &PartitionInfo) -> Result<()> {
        let mut state = self.record("unmount")?;
        state.occupied.retain(|p| p != &partition.mount);
        if let Some(parts) = state.partitions.get_mut(&partition.disk_id) {
            for part in parts.iter_mut().filter(|p| p.id == partition.id) {
                part.mount.clear();
            }
        }
        Ok(())
    }
}

impl Ejector for FakeBackend {
    fn eject(&self, device: &DeviceInfo) -> Result<()> {
        let mut state = self.record("eject")?;
        state.devices.retain(|d| d.id != device.id);
        Ok(())
    }
}

impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }
}
