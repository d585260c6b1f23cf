use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const UNKNOWN_MODEL: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FileSystem {
    Fat,
    Fat32,
    Ntfs,
    ExFat,
    Apfs,
    #[default]
    Unknown,
}

impl FileSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileSystem::Fat => "FAT",
            FileSystem::Fat32 => "FAT32",
            FileSystem::Ntfs => "NTFS",
            FileSystem::ExFat => "exFAT",
            FileSystem::Apfs => "APFS",
            FileSystem::Unknown => "Unknown",
        }
    }

    /// Translates a backend filesystem/partition-type string. Unmapped values
    /// degrade to `Unknown`.
    ///
    /// Sources: lsblk `fstype`, PowerShell `Get-Partition` `Type`, diskutil `Content`.
    pub fn from_backend(value: &str) -> FileSystem {
        match value.trim() {
            "vfat" => FileSystem::Fat32,
            "exfat" => FileSystem::ExFat,
            "ntfs" => FileSystem::Ntfs,
            "XINT13" => FileSystem::Fat,
            "FAT32" | "FAT32 XINT13" => FileSystem::Fat32,
            // EFI system partitions are FAT32 in practice.
            "System" => FileSystem::Fat32,
            // exFAT or FAT32 on Windows; both mount the same way.
            "Basic" => FileSystem::Fat32,
            "IFS" => FileSystem::Ntfs,
            // diskutil reports NTFS and exFAT alike.
            "Windows_NTFS" => FileSystem::Ntfs,
            "Windows_FAT_32" => FileSystem::Fat32,
            "Microsoft Basic Data" => FileSystem::Fat32,
            "EFI" => FileSystem::Fat32,
            "Apple_APFS" => FileSystem::Apfs,
            _ => FileSystem::Unknown,
        }
    }
}

impl fmt::Display for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileSystem {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fat" => Ok(FileSystem::Fat),
            "fat32" | "vfat" => Ok(FileSystem::Fat32),
            "ntfs" => Ok(FileSystem::Ntfs),
            "exfat" => Ok(FileSystem::ExFat),
            "apfs" => Ok(FileSystem::Apfs),
            other => Err(format!("unknown file system {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PartitionStyle {
    Mbr,
    Gpt,
    #[default]
    Unknown,
}

impl PartitionStyle {
    /// Sources: lsblk `pttype`, PowerShell `Get-Disk` `PartitionStyle`, diskutil `Content`.
    pub fn from_backend(value: &str) -> PartitionStyle {
        match value.trim() {
            "dos" | "MBR" | "FDisk_partition_scheme" => PartitionStyle::Mbr,
            "gpt" | "GPT" | "GUID_partition_scheme" => PartitionStyle::Gpt,
            _ => PartitionStyle::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStyle::Mbr => "MBR",
            PartitionStyle::Gpt => "GPT",
            PartitionStyle::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PartitionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-neutral description of a disk as reported by a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,   // sdb, disk4, 1
    pub path: String, // /dev/sdb, /dev/disk4, \\?\usbstor#...
    pub removable: bool,
    pub size: u64,
    pub make: String,
    pub model: String,
    pub partition_style: PartitionStyle,
}

/// Backend-neutral description of one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub disk_id: String,
    pub id: String,    // sdb1, disk4s2, 1
    pub path: String,  // /dev/sdb1, \\?\Volume{...}\
    pub mount: String, // mount directory or drive letter, empty if unmounted
    pub label: String,
    pub file_system: FileSystem,
    pub size: u64,
}
