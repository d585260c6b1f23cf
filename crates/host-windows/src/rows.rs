//! `ConvertTo-Json` rows emitted by the storage cmdlets.

use serde::Deserialize;
use unidisk_core::{DeviceInfo, FileSystem, PartitionInfo, PartitionStyle};

/// CIM enums arrive as names or as their numeric values depending on the
/// PowerShell version.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CimEnum {
    Number(u64),
    Name(String),
}

/// `MSFT_Disk.BusType` value for USB.
const BUS_TYPE_USB: u64 = 7;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiskRow {
    pub disk_number: u32,
    pub partition_style: Option<CimEnum>,
    pub bus_type: Option<CimEnum>,
    pub path: Option<String>,
    #[serde(default)]
    pub size: u64,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

impl DiskRow {
    fn partition_style(&self) -> PartitionStyle {
        match &self.partition_style {
            Some(CimEnum::Number(1)) => PartitionStyle::Mbr,
            Some(CimEnum::Number(2)) => PartitionStyle::Gpt,
            Some(CimEnum::Name(name)) => PartitionStyle::from_backend(name),
            _ => PartitionStyle::Unknown,
        }
    }

    fn is_usb(&self) -> bool {
        match &self.bus_type {
            Some(CimEnum::Number(n)) => *n == BUS_TYPE_USB,
            Some(CimEnum::Name(name)) => name == "USB",
            None => false,
        }
    }

    pub fn into_device(self) -> DeviceInfo {
        DeviceInfo {
            id: self.disk_number.to_string(),
            path: self.path.clone().unwrap_or_default(),
            removable: self.is_usb(),
            size: self.size,
            make: self.manufacturer.as_deref().unwrap_or("").trim().to_string(),
            model: self.model.as_deref().unwrap_or("").trim().to_string(),
            partition_style: self.partition_style(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartitionRow {
    pub disk_number: u32,
    pub partition_number: u32,
    pub path: Option<String>,
    #[serde(default)]
    pub size: u64,
    pub drive_letter: Option<String>,
    pub r#type: Option<String>,
}

impl PartitionRow {
    /// Unassigned letters serialize as `"\u0000"`.
    fn drive_letter(&self) -> String {
        self.drive_letter
            .as_deref()
            .and_then(|letter| letter.chars().next())
            .filter(char::is_ascii_alphabetic)
            .map(|letter| letter.to_ascii_uppercase().to_string())
            .unwrap_or_default()
    }

    pub fn into_partition(self) -> PartitionInfo {
        PartitionInfo {
            disk_id: self.disk_number.to_string(),
            id: self.partition_number.to_string(),
            mount: self.drive_letter(),
            path: self.path.unwrap_or_default(),
            label: String::new(),
            file_system: FileSystem::from_backend(self.r#type.as_deref().unwrap_or("")),
            size: self.size,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VolumeRow {
    #[serde(rename = "FileSystemLabel")]
    pub label: Option<String>,
}
