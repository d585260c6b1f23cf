//! Decoding of `lsblk -J -b` output.

use serde::Deserialize;
use unidisk_core::command::decode_json;
use unidisk_core::{DeviceInfo, FileSystem, PartitionInfo, PartitionStyle, Result};

pub const COLUMNS: &str = "kname,label,fstype,pttype,type,size,hotplug,mountpoint,vendor,model";

#[derive(Debug, Deserialize)]
struct Lsblk {
    #[serde(default)]
    blockdevices: Vec<BlockDev>,
}

/// One row. Older util-linux prints numbers and flags as strings, newer
/// releases use JSON scalars and nest partitions under `children`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockDev {
    pub kname: String,
    pub label: Option<String>,
    pub fstype: Option<String>,
    pub pttype: Option<String>,
    #[serde(rename = "type")]
    pub dtype: String,
    pub size: Option<Scalar>,
    pub hotplug: Option<Scalar>,
    pub mountpoint: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub children: Vec<BlockDev>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Flag(bool),
    Number(u64),
    Text(String),
}

impl Scalar {
    fn as_u64(&self) -> u64 {
        match self {
            Scalar::Flag(flag) => u64::from(*flag),
            Scalar::Number(n) => *n,
            Scalar::Text(text) => text.trim().parse().unwrap_or(0),
        }
    }

    fn as_bool(&self) -> bool {
        match self {
            Scalar::Flag(flag) => *flag,
            Scalar::Number(n) => *n != 0,
            Scalar::Text(text) => matches!(text.trim(), "1" | "true"),
        }
    }
}

fn text(value: &Option<String>) -> String {
    value.as_deref().unwrap_or("").trim().to_string()
}

impl BlockDev {
    pub fn size(&self) -> u64 {
        self.size.as_ref().map(Scalar::as_u64).unwrap_or(0)
    }

    pub fn hotplug(&self) -> bool {
        self.hotplug.as_ref().map(Scalar::as_bool).unwrap_or(false)
    }

    fn flatten_into(self, out: &mut Vec<BlockDev>) {
        let mut row = self;
        let children = std::mem::take(&mut row.children);
        out.push(row);
        for child in children {
            child.flatten_into(out);
        }
    }

    fn into_device(self) -> DeviceInfo {
        DeviceInfo {
            path: format!("/dev/{}", self.kname),
            removable: self.hotplug(),
            size: self.size(),
            make: text(&self.vendor),
            model: text(&self.model),
            partition_style: PartitionStyle::from_backend(self.pttype.as_deref().unwrap_or("")),
            id: self.kname,
        }
    }

    fn into_partition(self, disk_id: &str) -> PartitionInfo {
        PartitionInfo {
            disk_id: disk_id.to_string(),
            path: format!("/dev/{}", self.kname),
            mount: text(&self.mountpoint),
            label: text(&self.label),
            file_system: FileSystem::from_backend(self.fstype.as_deref().unwrap_or("")),
            size: self.size(),
            id: self.kname,
        }
    }
}

/// Every row, parents before their children.
pub fn parse_rows(raw: &[u8]) -> Result<Vec<BlockDev>> {
    let parsed: Lsblk = decode_json(raw)?;
    let mut rows = Vec::new();
    for dev in parsed.blockdevices {
        dev.flatten_into(&mut rows);
    }
    Ok(rows)
}

/// Whole disks from `lsblk -d`. Loop, rom and other virtual rows are dropped.
pub fn parse_disks(raw: &[u8]) -> Result<Vec<DeviceInfo>> {
    Ok(parse_rows(raw)?
        .into_iter()
        .filter(|row| row.dtype == "disk")
        .map(BlockDev::into_device)
        .collect())
}

/// Partitions of `disk_id`, in lsblk order.
pub fn parse_partitions(raw: &[u8], disk_id: &str) -> Result<Vec<PartitionInfo>> {
    Ok(parse_rows(raw)?
        .into_iter()
        .filter(|row| row.dtype == "part")
        .map(|row| row.into_partition(disk_id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use unidisk_core::ErrorKind;

    const DISKS: &str = r#"{
       "blockdevices": [
          {"kname":"sda", "label":null, "fstype":null, "pttype":"gpt", "type":"disk", "size":500107862016, "hotplug":false, "mountpoint":null, "vendor":"ATA     ", "model":"Samsung SSD 860 "},
          {"kname":"sdb", "label":null, "fstype":null, "pttype":"dos", "type":"disk", "size":"15518924800", "hotplug":"1", "mountpoint":null, "vendor":"SanDisk ", "model":"Ultra"},
          {"kname":"loop0", "label":null, "fstype":"squashfs", "pttype":null, "type":"loop", "size":4096, "hotplug":false, "mountpoint":"/snap/core/1", "vendor":null, "model":null}
       ]
    }"#;

    const NESTED: &str = r#"{
       "blockdevices": [
          {"kname":"sdb", "label":null, "fstype":null, "pttype":"gpt", "type":"disk", "size":15518924800, "hotplug":true, "mountpoint":null, "vendor":"SanDisk", "model":"Ultra",
             "children": [
                {"kname":"sdb1", "label":"SOMELABEL", "fstype":"vfat", "pttype":"gpt", "type":"part", "size":15517876224, "hotplug":true, "mountpoint":"/mnt/usb/128", "vendor":null, "model":null},
                {"kname":"sdb2", "label":null, "fstype":"ntfs", "pttype":"gpt", "type":"part", "size":1048576, "hotplug":true, "mountpoint":null, "vendor":null, "model":null}
             ]
          }
       ]
    }"#;

    #[test]
    fn disks_decode_both_scalar_styles() {
        let disks = parse_disks(DISKS.as_bytes()).unwrap();
        assert_eq!(disks.len(), 2);

        assert_eq!(disks[0].id, "sda");
        assert!(!disks[0].removable);
        assert_eq!(disks[0].make, "ATA");
        assert_eq!(disks[0].model, "Samsung SSD 860");
        assert_eq!(disks[0].partition_style, PartitionStyle::Gpt);

        assert_eq!(disks[1].path, "/dev/sdb");
        assert!(disks[1].removable);
        assert_eq!(disks[1].size, 15_518_924_800);
        assert_eq!(disks[1].partition_style, PartitionStyle::Mbr);
    }

    #[test]
    fn partitions_are_flattened_in_order() {
        let parts = parse_partitions(NESTED.as_bytes(), "sdb").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].id, "sdb1");
        assert_eq!(parts[0].disk_id, "sdb");
        assert_eq!(parts[0].label, "SOMELABEL");
        assert_eq!(parts[0].mount, "/mnt/usb/128");
        assert_eq!(parts[0].file_system, FileSystem::Fat32);
        assert_eq!(parts[1].file_system, FileSystem::Ntfs);
        assert_eq!(parts[1].mount, "");
    }

    #[test]
    fn unpartitioned_disk_has_no_partitions() {
        let raw = br#"{"blockdevices":[{"kname":"sdc","label":null,"fstype":null,"pttype":null,"type":"disk","size":8000000000,"hotplug":true,"mountpoint":null,"vendor":null,"model":null}]}"#;
        assert!(parse_partitions(raw, "sdc").unwrap().is_empty());
    }

    #[test]
    fn malformed_output_is_unmarshal() {
        let err = parse_disks(b"{\"blockdevices\": [ {").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unmarshal);
        let err = parse_disks(b"   \n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Empty);
    }
}
