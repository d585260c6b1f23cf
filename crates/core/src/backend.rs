//! Capability interfaces implemented once per host.
//!
//! Backends translate a single request into tool invocations and decode the
//! result. Guards, filtering, state updates and error wrapping stay in the
//! core so that semantics do not drift between hosts.

use std::fmt::Debug;

use crate::error::Result;
use crate::layout::PartitionPlan;
use crate::model::{DeviceInfo, FileSystem, PartitionInfo};

pub trait Prober {
    /// Enumerates disks. An empty `device_id` means all disks.
    fn probe(&self, device_id: &str) -> Result<Vec<DeviceInfo>>;
}

pub trait PartitionReader {
    /// Lists partitions in detection order. An unpartitioned disk yields an
    /// empty list, not an error.
    fn list_partitions(&self, device: &DeviceInfo) -> Result<Vec<PartitionInfo>>;

    /// Reads the volume label of a mounted partition when the listing does
    /// not carry it.
    fn volume_label(&self, _partition: &PartitionInfo) -> Result<Option<String>> {
        Ok(None)
    }
}

pub trait Partitioner {
    /// Destroys partition table and filesystem signatures.
    fn wipe(&self, device: &DeviceInfo) -> Result<()>;

    /// Labels the (wiped) device GPT.
    fn convert_to_gpt(&self, device: &DeviceInfo) -> Result<()>;

    fn create_partition(&self, device: &DeviceInfo, label: &str, plan: &PartitionPlan) -> Result<()>;

    /// True when mounted partitions must be released before a wipe.
    fn tracks_mounts(&self) -> bool {
        false
    }
}

pub trait Formatter {
    fn supports(&self, file_system: FileSystem) -> bool;

    fn format(&self, partition: &PartitionInfo, file_system: FileSystem, label: &str) -> Result<()>;
}

pub trait Mounter {
    /// Free access paths for `partition`, most preferred first.
    fn free_access_paths(&self, partition: &PartitionInfo) -> Result<Vec<String>>;

    fn access_path_free(&self, access_path: &str) -> Result<bool>;

    /// Mounts at `access_path` and returns the path actually in effect.
    fn mount(&self, partition: &PartitionInfo, access_path: &str) -> Result<String>;

    fn unmount(&self, partition: &PartitionInfo) -> Result<()>;
}

pub trait Ejector {
    fn eject(&self, device: &DeviceInfo) -> Result<()>;
}

/// The full capability set for one host.
pub trait Backend:
    Prober + PartitionReader + Partitioner + Formatter + Mounter + Ejector + Debug + Send + Sync
{
    fn name(&self) -> &'static str;
}
