//! Decoding of `diskutil ... -plist` output.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use unidisk_core::{
    DeviceInfo, Error, ErrorKind, FileSystem, PartitionInfo, PartitionStyle, Result,
};

/// `diskutil list -plist`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiskList {
    pub all_disks: Vec<String>,
    pub all_disks_and_partitions: Vec<ListedDisk>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListedDisk {
    pub content: String,
    pub device_identifier: String,
    pub partitions: Vec<ListedPartition>,
    pub size: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListedPartition {
    pub content: String,
    pub device_identifier: String,
    pub mount_point: String,
    pub size: u64,
    pub volume_name: String,
}

/// `diskutil info -plist`.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiskInfo {
    #[serde(rename = "DeviceIdentifier")]
    pub device_identifier: String,
    #[serde(rename = "DeviceNode")]
    pub device_node: String,
    #[serde(rename = "RemovableMedia")]
    pub removable_media: bool,
    #[serde(rename = "IOKitSize")]
    pub iokit_size: u64,
    #[serde(rename = "IORegistryEntryName")]
    pub registry_name: String,
    #[serde(rename = "MediaName")]
    pub media_name: String,
    #[serde(rename = "Content")]
    pub content: String,
    #[serde(rename = "MountPoint")]
    pub mount_point: String,
}

pub fn decode_plist<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(Error::new(ErrorKind::Empty, "diskutil printed nothing"));
    }
    plist::from_bytes(raw)
        .map_err(|err| Error::with_source(ErrorKind::Unmarshal, "decoding diskutil plist", err))
}

/// Matches slice identifiers such as `disk4s2`.
pub fn is_partition_id(id: &str) -> bool {
    let bytes = id.as_bytes();
    let letters = bytes.iter().take_while(|b| b.is_ascii_alphabetic()).count();
    letters > 0
        && bytes[letters..]
            .windows(3)
            .any(|w| w[0].is_ascii_digit() && w[1] == b's' && w[2].is_ascii_digit())
}

impl DiskInfo {
    /// `IORegistryEntryName` minus the media name; its first word is the vendor.
    pub fn manufacturer(&self) -> String {
        self.registry_name
            .replacen(&self.media_name, "", 1)
            .split(' ')
            .next()
            .unwrap_or("")
            .trim()
            .to_string()
    }

    pub fn into_device(self) -> DeviceInfo {
        DeviceInfo {
            make: self.manufacturer(),
            model: self.media_name.trim().to_string(),
            path: self.device_node,
            removable: self.removable_media,
            size: self.iokit_size,
            partition_style: PartitionStyle::from_backend(&self.content),
            id: self.device_identifier,
        }
    }
}

impl ListedPartition {
    pub fn into_partition(self, disk_id: &str) -> PartitionInfo {
        PartitionInfo {
            disk_id: disk_id.to_string(),
            path: format!("/dev/{}", self.device_identifier),
            mount: self.mount_point,
            label: self.volume_name,
            file_system: FileSystem::from_backend(&self.content),
            size: self.size,
            id: self.device_identifier,
        }
    }
}
