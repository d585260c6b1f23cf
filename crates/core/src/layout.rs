use crate::model::FileSystem;

/// Alignment reservation ahead of the first partition, in bytes.
pub const PARTITION_OFFSET: u64 = 4_294_656;
/// Largest FAT32 volume Windows will format.
pub const MAX_FAT32_VOLUME: u64 = 30_648_342_272;
/// Largest FAT32 partition produced on any host, so media stay portable.
pub const MAX_FAT32_PARTITION: u64 = MAX_FAT32_VOLUME - PARTITION_OFFSET;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    pub offset: u64,
    /// `None` spans the remainder of the device.
    pub size: Option<u64>,
    pub file_system: FileSystem,
}

impl PartitionPlan {
    /// Exclusive end offset, if bounded.
    pub fn end(&self) -> Option<u64> {
        self.size.map(|size| self.offset.saturating_add(size))
    }
}

/// Computes the single-partition layout for a device.
pub fn plan_partition(device_size: u64, file_system: FileSystem, requested: Option<u64>) -> PartitionPlan {
    let mut size = requested.filter(|size| *size > 0);
    if file_system == FileSystem::Fat32 {
        size = match size {
            Some(size) => Some(size.min(MAX_FAT32_PARTITION)),
            None if device_size >= MAX_FAT32_PARTITION => Some(MAX_FAT32_PARTITION),
            None => None,
        };
    }
    PartitionPlan {
        offset: PARTITION_OFFSET,
        size,
        file_system,
    }
}
