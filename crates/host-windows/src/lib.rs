//! Windows backend driven by the PowerShell storage cmdlets.

pub mod powershell;
pub mod rows;

#[cfg(windows)]
mod drives;
#[cfg(not(windows))]
#[path = "drives_stub.rs"]
mod drives;

use std::sync::Arc;

use tracing::info;
use unidisk_core::backend::{Ejector, Formatter, Mounter, PartitionReader, Partitioner, Prober};
use unidisk_core::command::{contains_failure, decode_json};
use unidisk_core::layout::PartitionPlan;
use unidisk_core::{
    Backend, CommandRunner, DeviceInfo, Error, ErrorKind, FileSystem, PartitionInfo, Result,
    SystemRunner, WindowsConfig,
};

use crate::powershell::{quote, PowerShell};
use crate::rows::{DiskRow, PartitionRow, VolumeRow};

/// GPT type GUID for Microsoft basic data partitions.
pub const BASIC_DATA_GUID: &str = "{ebd0a0a2-b9e5-4433-87c0-68b6b72699c7}";

#[derive(Clone)]
pub struct WindowsBackend {
    ps: PowerShell,
    reserved: Vec<char>,
    occupied: fn() -> Vec<char>,
}

impl std::fmt::Debug for WindowsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsBackend")
            .field("ps", &self.ps)
            .field("reserved", &self.reserved)
            .finish_non_exhaustive()
    }
}

impl Default for WindowsBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner), WindowsConfig::default())
    }
}

/// Accepts `F`, `F:` or `F:\`.
pub fn drive_letter(access_path: &str) -> Option<char> {
    let trimmed = access_path.trim();
    let mut chars = trimmed.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    let rest: String = chars.collect();
    (letter.is_ascii_alphabetic() && matches!(rest.as_str(), "" | ":" | ":\\")).then_some(letter)
}

/// Disk and partition numbers are interpolated into scripts, so anything
/// other than ASCII digits is rejected.
pub fn cim_number<'a>(what: &str, id: &'a str) -> Result<&'a str> {
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(id)
    } else {
        Err(Error::new(ErrorKind::Input, format!("{what} {id:?} is not a number")))
    }
}

fn format_personality(file_system: FileSystem) -> Option<&'static str> {
    match file_system {
        FileSystem::Fat => Some("FAT"),
        FileSystem::Fat32 => Some("FAT32"),
        FileSystem::Ntfs => Some("NTFS"),
        FileSystem::ExFat => Some("exFAT"),
        FileSystem::Apfs | FileSystem::Unknown => None,
    }
}

impl WindowsBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, config: WindowsConfig) -> Self {
        Self {
            ps: PowerShell::new(runner, config.error_action),
            reserved: config
                .reserved_letters
                .chars()
                .filter(char::is_ascii_alphabetic)
                .map(|c| c.to_ascii_uppercase())
                .collect(),
            occupied: drives::occupied_letters,
        }
    }

    /// Replaces the host drive-letter probe.
    pub fn with_occupied_probe(mut self, probe: fn() -> Vec<char>) -> Self {
        self.occupied = probe;
        self
    }

    fn free_letters(&self) -> Vec<char> {
        let occupied = (self.occupied)();
        ('A'..='Z')
            .filter(|letter| !self.reserved.contains(letter) && !occupied.contains(letter))
            .collect()
    }
}

impl Prober for WindowsBackend {
    fn probe(&self, device_id: &str) -> Result<Vec<DeviceInfo>> {
        let device_id = if device_id.is_empty() {
            device_id
        } else {
            cim_number("disk", device_id)?
        };
        // @() keeps a single disk rendering as an array.
        let script = format!(
            "ConvertTo-Json @(Get-Disk {device_id} | Select-Object DiskNumber, PartitionStyle, BusType, Path, Size, Manufacturer, Model)"
        );
        let output = self.ps.command(&script, &[powershell::GET_DISK])?;
        let rows: Vec<DiskRow> = decode_json(&output.stdout)?;
        Ok(rows.into_iter().map(DiskRow::into_device).collect())
    }
}

impl PartitionReader for WindowsBackend {
    fn list_partitions(&self, device: &DeviceInfo) -> Result<Vec<PartitionInfo>> {
        let disk = cim_number("disk", &device.id)?;
        let script = format!(
            "ConvertTo-Json @(Get-Partition -DiskNumber {disk} | select @{{n='Path';e={{$_.AccessPaths[0]}}}}, Size, PartitionNumber, DriveLetter, Type, DiskNumber)"
        );
        let output = self.ps.raw(&script)?;
        let text = output.combined();
        // An unpartitioned disk makes Get-Partition fail.
        if contains_failure(&text, powershell::NO_PARTITIONS) {
            return Ok(Vec::new());
        }
        if contains_failure(&text, powershell::GET_PARTITION) {
            return Err(Error::new(ErrorKind::BackendOutput, text.trim().to_string()));
        }
        let rows: Vec<PartitionRow> = decode_json(&output.stdout)?;
        Ok(rows.into_iter().map(PartitionRow::into_partition).collect())
    }

    fn volume_label(&self, partition: &PartitionInfo) -> Result<Option<String>> {
        let Some(letter) = drive_letter(&partition.mount) else {
            return Ok(None);
        };
        let script = format!("Get-Volume {letter} | select FileSystemLabel | ConvertTo-Json");
        let output = self.ps.command(&script, &[powershell::GET_VOLUME])?;
        let volume: VolumeRow = decode_json(&output.stdout)?;
        Ok(volume.label.filter(|label| !label.is_empty()))
    }
}

impl Partitioner for WindowsBackend {
    fn wipe(&self, device: &DeviceInfo) -> Result<()> {
        let disk = cim_number("disk", &device.id)?;
        let script = format!(
            "Clear-Disk -Number {} -RemoveData -RemoveOEM -Confirm:$false",
            quote(disk)
        );
        self.ps.command(&script, &[powershell::CLEAR_DISK])?;
        Ok(())
    }

    fn convert_to_gpt(&self, device: &DeviceInfo) -> Result<()> {
        let disk = cim_number("disk", &device.id)?;
        let script = format!("Set-Disk -Number {disk} -PartitionStyle GPT");
        self.ps.command(&script, &[powershell::SET_DISK])?;
        Ok(())
    }

    /// Windows applies the label when the volume is formatted.
    fn create_partition(&self, device: &DeviceInfo, _label: &str, plan: &PartitionPlan) -> Result<()> {
        let size = plan
            .size
            .map(|size| format!("-Size {size}"))
            .unwrap_or_else(|| "-UseMaximumSize".to_string());
        let disk = cim_number("disk", &device.id)?;
        let script = format!(
            "New-Partition -DiskNumber {disk} -GptType '{BASIC_DATA_GUID}' -Offset {} {size}",
            plan.offset
        );
        self.ps.command(&script, &[powershell::NEW_PARTITION])?;
        Ok(())
    }
}

impl Formatter for WindowsBackend {
    fn supports(&self, file_system: FileSystem) -> bool {
        format_personality(file_system).is_some()
    }

    fn format(&self, partition: &PartitionInfo, file_system: FileSystem, label: &str) -> Result<()> {
        let personality = format_personality(file_system).ok_or_else(|| {
            Error::new(
                ErrorKind::UnsupportedFileSystem,
                format!("Format-Volume cannot create {file_system}"),
            )
        })?;
        let script = format!(
            "Format-Volume -Path {} -FileSystem {personality} -NewFileSystemLabel {}",
            quote(&partition.path),
            quote(label)
        );
        self.ps.command(&script, &[powershell::FORMAT_VOLUME])?;
        info!(partition = %partition.id, disk = %partition.disk_id, fs = %file_system, "formatted");
        Ok(())
    }
}

impl Mounter for WindowsBackend {
    fn free_access_paths(&self, _partition: &PartitionInfo) -> Result<Vec<String>> {
        Ok(self.free_letters().into_iter().map(String::from).collect())
    }

    fn access_path_free(&self, access_path: &str) -> Result<bool> {
        let letter = drive_letter(access_path).ok_or_else(|| {
            Error::new(ErrorKind::Input, format!("{access_path:?} is not a drive letter"))
        })?;
        Ok(self.free_letters().contains(&letter))
    }

    fn mount(&self, partition: &PartitionInfo, access_path: &str) -> Result<String> {
        let letter = drive_letter(access_path).ok_or_else(|| {
            Error::new(ErrorKind::Input, format!("{access_path:?} is not a drive letter"))
        })?;
        let disk = cim_number("disk", &partition.disk_id)?;
        let number = cim_number("partition", &partition.id)?;
        let script = format!(
            "Set-Partition -DiskNumber {disk} -PartitionNumber {number} -NewDriveLetter {letter}"
        );
        self.ps.command(&script, &[powershell::SET_PARTITION])?;
        Ok(letter.to_string())
    }

    fn unmount(&self, partition: &PartitionInfo) -> Result<()> {
        let letter = drive_letter(&partition.mount).ok_or_else(|| {
            Error::new(ErrorKind::Input, format!("{:?} is not a drive letter", partition.mount))
        })?;
        let disk = cim_number("disk", &partition.disk_id)?;
        let number = cim_number("partition", &partition.id)?;
        let script = format!(
            "Remove-PartitionAccessPath -DiskNumber {disk} -PartitionNumber {number} -AccessPath '{letter}:\\'"
        );
        self.ps.command(&script, &[powershell::REMOVE_ACCESS_PATH])?;
        Ok(())
    }
}

impl Ejector for WindowsBackend {
    /// Takes the disk offline; Windows has no portable power-off cmdlet.
    fn eject(&self, device: &DeviceInfo) -> Result<()> {
        let disk = cim_number("disk", &device.id)?;
        let script = format!("Set-Disk -Number {disk} -IsOffline $true");
        self.ps.command(&script, &[powershell::SET_DISK])?;
        Ok(())
    }
}

impl Backend for WindowsBackend {
    fn name(&self) -> &'static str {
        "windows"
    }
}
