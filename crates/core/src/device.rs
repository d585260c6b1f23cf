use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::layout::plan_partition;
use crate::model::{DeviceInfo, FileSystem, PartitionStyle, UNKNOWN_MODEL};
use crate::partition::Partition;

/// Parameters for [`Device::partition_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRequest {
    pub label: String,
    pub file_system: FileSystem,
    /// `None` uses the largest size the filesystem allows.
    pub size: Option<u64>,
}

impl PartitionRequest {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            file_system: FileSystem::Fat32,
            size: None,
        }
    }
}

/// A disk attached to the host, with a snapshot of its partitions.
#[derive(Debug, Clone)]
pub struct Device {
    info: DeviceInfo,
    partitions: Vec<Partition>,
    backend: Arc<dyn Backend>,
}

impl Device {
    /// Wraps probe output without touching the backend.
    pub fn from_info(info: DeviceInfo, backend: Arc<dyn Backend>) -> Self {
        Self {
            info,
            partitions: Vec::new(),
            backend,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn identifier(&self) -> &str {
        &self.info.id
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn removable(&self) -> bool {
        self.info.removable
    }

    pub fn make(&self) -> &str {
        &self.info.make
    }

    pub fn model(&self) -> &str {
        &self.info.model
    }

    pub fn partition_style(&self) -> PartitionStyle {
        self.info.partition_style
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partitions_mut(&mut self) -> &mut [Partition] {
        &mut self.partitions
    }

    pub fn friendly_name(&self) -> String {
        let make = self.info.make.trim();
        let model = self.info.model.trim();
        match (make.is_empty(), model.is_empty()) {
            (true, true) => UNKNOWN_MODEL.to_string(),
            (false, true) => make.to_string(),
            (true, false) => model.to_string(),
            (false, false) => format!("{make} {model}"),
        }
    }

    fn require_id(&self) -> Result<()> {
        if self.info.id.is_empty() {
            return Err(Error::new(ErrorKind::Input, "device identifier was empty"));
        }
        Ok(())
    }

    fn require_id_and_path(&self) -> Result<()> {
        self.require_id()?;
        if self.info.path.is_empty() {
            return Err(Error::new(ErrorKind::Input, "device path was empty"));
        }
        Ok(())
    }

    /// Replaces the partition snapshot with a fresh listing.
    ///
    /// With `assign_access_path`, a lone partition with a readable filesystem
    /// is mounted so its volume label can be read. That step is best-effort.
    pub fn detect_partitions(&mut self, assign_access_path: bool) -> Result<()> {
        self.require_id()?;
        let listed = self
            .backend
            .list_partitions(&self.info)
            .kind_context(ErrorKind::DetectPartitions, || {
                format!("listing partitions of {}", self.info.id)
            })?;

        let mut partitions: Vec<Partition> = listed
            .into_iter()
            .map(|info| Partition::new(info, Arc::clone(&self.backend)))
            .collect();

        if assign_access_path && partitions.len() == 1 {
            let lone = &mut partitions[0];
            if lone.file_system() != FileSystem::Unknown {
                if let Err(err) = lone.mount("") {
                    warn!(partition = %lone.identifier(), error = %err, "label probe mount failed");
                }
            }
        }

        for part in partitions.iter_mut() {
            if !part.label().is_empty() || part.mount_point().is_empty() {
                continue;
            }
            match self.backend.volume_label(part.info()) {
                Ok(Some(label)) => part.set_label(label),
                Ok(None) => {}
                Err(err) => {
                    warn!(partition = %part.identifier(), error = %err, "volume label unavailable")
                }
            }
        }

        debug!(device = %self.info.id, count = partitions.len(), "partitions detected");
        self.partitions = partitions;
        Ok(())
    }

    /// Returns the first partition, in detection order, of at least
    /// `min_size` bytes and, if given, of filesystem `file_system`.
    pub fn select_partition(
        &mut self,
        min_size: u64,
        file_system: Option<FileSystem>,
    ) -> Result<&mut Partition> {
        self.require_id()?;
        self.detect_partitions(false)
            .kind_context(ErrorKind::Device, || format!("refreshing {}", self.info.id))?;
        if self.partitions.is_empty() {
            return Err(Error::new(ErrorKind::Empty, "no available partitions"));
        }

        let mut available = self
            .partitions
            .iter_mut()
            .filter(|part| part.size() >= min_size)
            .peekable();
        if available.peek().is_none() {
            return Err(Error::new(
                ErrorKind::Partition,
                format!("no partitions of at least {min_size} bytes"),
            ));
        }
        match file_system {
            None => available
                .next()
                .ok_or_else(|| Error::new(ErrorKind::Partition, "no available partitions")),
            Some(fs) => available.find(|part| part.file_system() == fs).ok_or_else(|| {
                Error::new(
                    ErrorKind::NoMatch,
                    format!("no available partitions of type {fs} and at least {min_size} bytes"),
                )
            }),
        }
    }

    /// Destroys every partition and relabels the disk GPT.
    ///
    /// A failed relabel after a successful erase is reported as
    /// [`ErrorKind::PartitionStyle`] rather than [`ErrorKind::Wipe`].
    pub fn wipe(&mut self) -> Result<()> {
        self.require_id_and_path()?;
        if self.backend.tracks_mounts() {
            self.dismount()
                .kind_context(ErrorKind::Wipe, || format!("dismounting {}", self.info.id))?;
        }

        self.backend
            .wipe(&self.info)
            .kind_context(ErrorKind::Wipe, || format!("erasing {}", self.info.id))?;
        self.partitions.clear();

        self.backend
            .convert_to_gpt(&self.info)
            .kind_context(ErrorKind::PartitionStyle, || {
                format!("relabeling {} as GPT", self.info.id)
            })?;
        self.info.partition_style = PartitionStyle::Gpt;

        info!(device = %self.info.id, "wiped");
        Ok(())
    }

    /// Creates a single FAT32 partition spanning the device, capped at the
    /// portable FAT32 maximum.
    pub fn partition(&mut self, label: &str) -> Result<()> {
        self.partition_with(&PartitionRequest::new(label))
    }

    pub fn partition_with(&mut self, request: &PartitionRequest) -> Result<()> {
        self.require_id_and_path()?;
        if !self.partitions.is_empty() {
            return Err(Error::with_source(
                ErrorKind::Partition,
                format!("partitioning {}", self.info.id),
                Error::new(ErrorKind::Device, "partition table not empty, wipe first"),
            ));
        }
        if !self.backend.supports(request.file_system) {
            return Err(Error::new(
                ErrorKind::UnsupportedFileSystem,
                format!("{} cannot create {} partitions", self.backend.name(), request.file_system),
            ));
        }

        let plan = plan_partition(self.info.size, request.file_system, request.size);
        debug!(device = %self.info.id, ?plan, "partition plan");
        self.backend
            .create_partition(&self.info, &request.label, &plan)
            .kind_context(ErrorKind::Partition, || format!("partitioning {}", self.info.id))?;
        self.info.partition_style = PartitionStyle::Gpt;

        self.detect_partitions(false)
            .kind_context(ErrorKind::Partition, || format!("redetecting {}", self.info.id))?;
        info!(device = %self.info.id, partitions = self.partitions.len(), "partitioned");
        Ok(())
    }

    /// Releases every access path held by this device's partitions.
    ///
    /// Partitions are released one at a time. The first failure stops the
    /// walk and is returned; earlier releases stay in effect.
    pub fn dismount(&mut self) -> Result<()> {
        self.require_id()?;
        for part in self.partitions.iter_mut() {
            if part.mount_point().is_empty() {
                continue;
            }
            self.backend.unmount(part.info()).kind_context(ErrorKind::Dismount, || {
                format!("releasing {} from {}", part.identifier(), part.mount_point())
            })?;
            info!(partition = %part.identifier(), mount = %part.mount_point(), "dismounted");
            part.clear_mount();
        }
        Ok(())
    }

    /// Powers off or detaches the device. On success the value is zeroed and
    /// every further operation fails with [`ErrorKind::Input`].
    pub fn eject(&mut self) -> Result<()> {
        self.require_id()?;
        self.backend
            .eject(&self.info)
            .kind_context(ErrorKind::Eject, || format!("ejecting {}", self.info.id))?;
        info!(device = %self.info.id, "ejected");
        self.info = DeviceInfo::default();
        self.partitions.clear();
        Ok(())
    }
}
