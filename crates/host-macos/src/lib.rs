//! macOS backend driven by `diskutil`.

pub mod diskutil;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use unidisk_core::backend::{Ejector, Formatter, Mounter, PartitionReader, Partitioner, Prober};
use unidisk_core::command::run_checked;
use unidisk_core::layout::PartitionPlan;
use unidisk_core::{
    is_vacant_dir, Backend, CommandRunner, DeviceInfo, Error, ErrorKind, FileSystem,
    PartitionInfo, Result, ResultExt, SystemRunner,
};

use crate::diskutil::{decode_plist, is_partition_id, DiskInfo, DiskList};

/// Label that makes `diskutil` skip the format step.
pub const NO_FORMAT: &str = "%noformat%";
const VOLUMES: &str = "/Volumes/";

#[derive(Clone)]
pub struct MacosBackend {
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for MacosBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacosBackend").finish_non_exhaustive()
    }
}

impl Default for MacosBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner))
    }
}

/// `diskutil` filesystem personality for a canonical filesystem.
fn personality(file_system: FileSystem) -> Option<&'static str> {
    match file_system {
        FileSystem::Fat => Some("MS-DOS FAT16"),
        FileSystem::Fat32 => Some("FAT32"),
        FileSystem::ExFat => Some("ExFAT"),
        FileSystem::Apfs => Some("APFS"),
        FileSystem::Ntfs | FileSystem::Unknown => None,
    }
}

/// FAT labels must be uppercase or diskutil rejects them.
fn volume_label(file_system: FileSystem, label: &str) -> String {
    if label.is_empty() {
        NO_FORMAT.to_string()
    } else if matches!(file_system, FileSystem::Fat | FileSystem::Fat32) {
        label.to_uppercase()
    } else {
        label.to_string()
    }
}

impl MacosBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn diskutil(&self, args: &[&str]) -> Result<Vec<u8>> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        Ok(run_checked(self.runner.as_ref(), "diskutil", &args)?.stdout)
    }

    fn list(&self, device_id: &str) -> Result<DiskList> {
        let raw = if device_id.is_empty() {
            self.diskutil(&["list", "-plist", "physical"])?
        } else {
            self.diskutil(&["list", "-plist", "physical", device_id])?
        };
        decode_plist(&raw)
    }

    /// `/Volumes/<label or id>`, the name diskutil itself would choose.
    fn volumes_hint(partition: &PartitionInfo) -> String {
        let name = if partition.label.is_empty() {
            &partition.id
        } else {
            &partition.label
        };
        format!("{VOLUMES}{name}")
    }

    fn info(&self, id: &str) -> Result<DiskInfo> {
        let info: DiskInfo = decode_plist(&self.diskutil(&["info", "-plist", id])?)?;
        if info == DiskInfo::default() {
            return Err(Error::new(ErrorKind::Empty, format!("diskutil info {id} was empty")));
        }
        Ok(info)
    }
}

impl Prober for MacosBackend {
    fn probe(&self, device_id: &str) -> Result<Vec<DeviceInfo>> {
        let list = self.list(device_id)?;
        if list.all_disks_and_partitions.is_empty() {
            return Err(Error::new(ErrorKind::Empty, "diskutil listed no disks"));
        }
        let mut devices = Vec::new();
        for id in list.all_disks.iter().filter(|id| !is_partition_id(id)) {
            devices.push(self.info(id)?.into_device());
        }
        Ok(devices)
    }
}

impl PartitionReader for MacosBackend {
    fn list_partitions(&self, device: &DeviceInfo) -> Result<Vec<PartitionInfo>> {
        let list = self.list(&device.id)?;
        Ok(list
            .all_disks_and_partitions
            .into_iter()
            .next()
            .map(|disk| {
                disk.partitions
                    .into_iter()
                    .map(|part| part.into_partition(&device.id))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Partitioner for MacosBackend {
    /// `eraseDisk` relabels GPT in the same step.
    fn wipe(&self, device: &DeviceInfo) -> Result<()> {
        self.diskutil(&["eraseDisk", "FAT32", NO_FORMAT, "GPT", &device.id])?;
        Ok(())
    }

    fn convert_to_gpt(&self, device: &DeviceInfo) -> Result<()> {
        debug!(device = %device.id, "already GPT after eraseDisk");
        Ok(())
    }

    fn create_partition(&self, device: &DeviceInfo, label: &str, plan: &PartitionPlan) -> Result<()> {
        let personality = personality(plan.file_system).ok_or_else(|| {
            Error::new(
                ErrorKind::UnsupportedFileSystem,
                format!("diskutil cannot create {}", plan.file_system),
            )
        })?;
        let size = plan
            .size
            .map(|size| format!("{size}B"))
            .unwrap_or_else(|| "100%".to_string());
        let label = volume_label(plan.file_system, label);
        self.diskutil(&["partitionDisk", &device.id, "1", "GPT", personality, &label, &size])?;

        // Some Windows tooling trips over the EFI slice diskutil adds.
        let efi = format!("{}s1", device.id);
        self.diskutil(&["eraseVolume", "free", "free", &efi])
            .kind_context(ErrorKind::Partition, || format!("removing EFI partition {efi}"))?;
        Ok(())
    }
}

impl Formatter for MacosBackend {
    fn supports(&self, file_system: FileSystem) -> bool {
        personality(file_system).is_some()
    }

    fn format(&self, partition: &PartitionInfo, file_system: FileSystem, label: &str) -> Result<()> {
        let personality = personality(file_system).ok_or_else(|| {
            Error::new(
                ErrorKind::UnsupportedFileSystem,
                format!("diskutil cannot format {file_system}"),
            )
        })?;
        let mut label = volume_label(file_system, label);
        if label == NO_FORMAT {
            label = "UNTITLED".to_string();
        }
        self.diskutil(&["eraseVolume", personality, &label, &partition.id])?;
        info!(partition = %partition.id, fs = %file_system, "formatted");
        Ok(())
    }
}

impl Mounter for MacosBackend {
    /// diskutil picks the final `/Volumes` name, so the pool holds a single
    /// hint and [`Mounter::mount`] reports where the volume actually landed.
    fn free_access_paths(&self, partition: &PartitionInfo) -> Result<Vec<String>> {
        Ok(vec![Self::volumes_hint(partition)])
    }

    fn access_path_free(&self, access_path: &str) -> Result<bool> {
        Ok(is_vacant_dir(Path::new(access_path)))
    }

    /// The pool hint mounts at diskutil's default location, which may gain a
    /// numeric suffix. Any other path is passed to `-mountPoint` verbatim.
    fn mount(&self, partition: &PartitionInfo, access_path: &str) -> Result<String> {
        let current = self.info(&partition.id)?.mount_point;
        if !current.is_empty() {
            return Ok(current);
        }
        if access_path == Self::volumes_hint(partition) {
            self.diskutil(&["mount", &partition.id])?;
        } else {
            self.diskutil(&["mount", "-mountPoint", access_path, &partition.id])?;
            return Ok(access_path.to_string());
        }
        let mounted = self.info(&partition.id)?.mount_point;
        if mounted.is_empty() {
            return Err(Error::new(
                ErrorKind::BackendOutput,
                format!("diskutil mount {} reported no mount point", partition.id),
            ));
        }
        Ok(mounted)
    }

    fn unmount(&self, partition: &PartitionInfo) -> Result<()> {
        self.diskutil(&["unmount", "force", &partition.id])?;
        Ok(())
    }
}

impl Ejector for MacosBackend {
    fn eject(&self, device: &DeviceInfo) -> Result<()> {
        self.diskutil(&["eject", &device.id])?;
        Ok(())
    }
}

impl Backend for MacosBackend {
    fn name(&self) -> &'static str {
        "macos"
    }
}
