use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::model::{FileSystem, PartitionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// Mount the freshly formatted volume at the first free access path.
    pub mount_after: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self { mount_after: true }
    }
}

/// One slice of a [`Device`](crate::Device). Treat values as snapshots: after
/// any change to the underlying disk, redetect through the owning device.
#[derive(Debug, Clone)]
pub struct Partition {
    info: PartitionInfo,
    backend: Arc<dyn Backend>,
}

impl Partition {
    pub(crate) fn new(info: PartitionInfo, backend: Arc<dyn Backend>) -> Self {
        Self { info, backend }
    }

    pub fn info(&self) -> &PartitionInfo {
        &self.info
    }

    pub fn identifier(&self) -> &str {
        &self.info.id
    }

    pub fn disk_identifier(&self) -> &str {
        &self.info.disk_id
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn label(&self) -> &str {
        &self.info.label
    }

    pub fn mount_point(&self) -> &str {
        &self.info.mount
    }

    pub fn file_system(&self) -> FileSystem {
        self.info.file_system
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub(crate) fn set_label(&mut self, label: String) {
        self.info.label = label;
    }

    pub(crate) fn clear_mount(&mut self) {
        self.info.mount.clear();
    }

    /// Mounts the partition at `requested`, or at the first free access path
    /// when `requested` is empty.
    ///
    /// Already-mounted partitions and partitions with an unreadable
    /// filesystem are left alone and succeed.
    pub fn mount(&mut self, requested: &str) -> Result<()> {
        if !self.info.mount.is_empty() {
            return Ok(());
        }
        if self.info.file_system == FileSystem::Unknown {
            debug!(partition = %self.info.id, "skipping mount of unknown file system");
            return Ok(());
        }
        if self.info.id.is_empty() || self.info.path.is_empty() {
            return Err(Error::new(ErrorKind::Input, "partition identifier or path was empty"));
        }

        let access_path = self.acquire_access_path(requested)?;
        let mounted = self
            .backend
            .mount(&self.info, &access_path)
            .kind_context(ErrorKind::Mount, || {
                format!("mounting {} at {}", self.info.id, access_path)
            })?;
        info!(partition = %self.info.id, mount = %mounted, "mounted");
        self.info.mount = mounted;
        Ok(())
    }

    fn acquire_access_path(&self, requested: &str) -> Result<String> {
        let requested = requested.trim();
        if !requested.is_empty() {
            let free = self
                .backend
                .access_path_free(requested)
                .kind_context(ErrorKind::AccessPath, || format!("checking {requested}"))?;
            if !free {
                return Err(Error::new(
                    ErrorKind::AccessPath,
                    format!("requested access path {requested} is not available"),
                ));
            }
            return Ok(requested.to_string());
        }

        let pool = self
            .backend
            .free_access_paths(&self.info)
            .kind_context(ErrorKind::ResourceUnavailable, || {
                format!("listing access paths for {}", self.info.id)
            })?;
        pool.into_iter()
            .next()
            .ok_or_else(|| Error::new(ErrorKind::ResourceUnavailable, "no free access paths"))
    }

    /// Formats as FAT32 and mounts the result.
    pub fn format(&mut self, label: &str) -> Result<()> {
        self.format_with(FileSystem::Fat32, label, FormatOptions::default())
    }

    pub fn format_with(
        &mut self,
        file_system: FileSystem,
        label: &str,
        options: FormatOptions,
    ) -> Result<()> {
        if self.info.path.is_empty() {
            return Err(Error::with_source(
                ErrorKind::Format,
                "formatting",
                Error::new(ErrorKind::Input, "partition path was empty"),
            ));
        }
        if !self.backend.supports(file_system) {
            return Err(Error::new(
                ErrorKind::UnsupportedFileSystem,
                format!("{} cannot format {}", self.backend.name(), file_system),
            ));
        }

        self.backend
            .format(&self.info, file_system, label)
            .kind_context(ErrorKind::Format, || {
                format!("formatting {} as {}", self.info.id, file_system)
            })?;
        info!(partition = %self.info.id, fs = %file_system, label, "formatted");

        // The format is authoritative for these two fields.
        self.info.file_system = file_system;
        self.info.label = label.to_string();

        if options.mount_after {
            self.mount("")
                .kind_context(ErrorKind::Mount, || format!("mounting {} after format", self.info.id))?;
        }
        Ok(())
    }

    /// Lists the top-level entries under the mount point.
    pub fn contents(&self) -> Result<Vec<PathBuf>> {
        let root = self.access_root()?;
        let entries = fs::read_dir(&root)
            .kind_context(ErrorKind::Input, || format!("reading {}", root.display()))?;
        let mut contents = Vec::new();
        for entry in entries {
            let entry = entry.kind_context(ErrorKind::Read, || format!("reading {}", root.display()))?;
            contents.push(root.join(entry.file_name()));
        }
        contents.sort();
        Ok(contents)
    }

    /// Removes every file and folder from the mounted volume, leaving the
    /// filesystem in place.
    pub fn erase(&self) -> Result<()> {
        let root = self.access_root()?;
        let entries = fs::read_dir(&root)
            .kind_context(ErrorKind::Device, || format!("opening {}", root.display()))?;
        for entry in entries {
            let entry = entry.kind_context(ErrorKind::Read, || format!("reading {}", root.display()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .kind_context(ErrorKind::Read, || format!("inspecting {}", path.display()))?;
            let removed = if file_type.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.kind_context(ErrorKind::Wipe, || format!("removing {}", path.display()))?;
        }
        info!(partition = %self.info.id, root = %root.display(), "erased");
        Ok(())
    }

    fn access_root(&self) -> Result<PathBuf> {
        let mount = self.info.mount.trim();
        if mount.is_empty() {
            return Err(Error::new(
                ErrorKind::NotMounted,
                format!("partition {} has no access path", self.info.id),
            ));
        }
        Ok(access_root(mount))
    }
}

/// Drive letters (`E` or `E:`) resolve to their root directory.
pub(crate) fn access_root(mount: &str) -> PathBuf {
    let letter = mount.strip_suffix(':').unwrap_or(mount);
    let mut chars = letter.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) if ch.is_ascii_alphabetic() => PathBuf::from(format!("{}:\\", ch)),
        _ => PathBuf::from(mount),
    }
}

/// Usable as a mount target: missing, or an empty directory.
pub fn is_vacant_dir(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => !path.exists(),
    }
}
