//! Linux backend driven by util-linux, parted, dosfstools and udisks.

pub mod lsblk;
pub mod mounts;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use unidisk_core::backend::{Ejector, Formatter, Mounter, PartitionReader, Partitioner, Prober};
use unidisk_core::command::{run_checked, CommandOutput};
use unidisk_core::layout::PartitionPlan;
use unidisk_core::{
    is_vacant_dir, Backend, CommandRunner, DeviceInfo, Error, ErrorKind, FileSystem, LinuxConfig,
    PartitionInfo, Result, SystemRunner,
};

/// Alternate mount directories tried after `<mount_root>/<partition>`.
const MOUNT_DIR_VARIANTS: usize = 8;

#[derive(Clone)]
pub struct LinuxBackend {
    runner: Arc<dyn CommandRunner>,
    config: LinuxConfig,
    mount_table: PathBuf,
}

impl std::fmt::Debug for LinuxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinuxBackend")
            .field("config", &self.config)
            .field("mount_table", &self.mount_table)
            .finish_non_exhaustive()
    }
}

impl Default for LinuxBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner), LinuxConfig::default())
    }
}

impl LinuxBackend {
    pub fn new(runner: Arc<dyn CommandRunner>, config: LinuxConfig) -> Self {
        Self {
            runner,
            config,
            mount_table: PathBuf::from(mounts::PROC_MOUNTS),
        }
    }

    /// Reads mount state from `table` instead of `/proc/self/mounts`.
    pub fn with_mount_table(mut self, table: impl Into<PathBuf>) -> Self {
        self.mount_table = table.into();
        self
    }

    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        run_checked(self.runner.as_ref(), program, args)
    }

    fn privileged(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        if self.config.use_sudo {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(program.to_string());
            full.extend(args.iter().cloned());
            self.run("sudo", &full)
        } else {
            self.run(program, args)
        }
    }

    fn lsblk(&self, whole_disks: bool, device_id: &str) -> Result<Vec<u8>> {
        let mut args = Vec::new();
        if whole_disks {
            args.push("-d".to_string());
        }
        args.extend(["-o", lsblk::COLUMNS, "-b", "-J"].map(String::from));
        if !device_id.is_empty() {
            args.push(format!("/dev/{device_id}"));
        }
        Ok(self.run("lsblk", &args)?.stdout)
    }

    fn candidate_dirs(&self, partition: &PartitionInfo) -> Vec<PathBuf> {
        let base = self.config.mount_root.join(&partition.id);
        let mut dirs = vec![base.clone()];
        for n in 1..=MOUNT_DIR_VARIANTS {
            dirs.push(PathBuf::from(format!("{}-{n}", base.display())));
        }
        dirs
    }

    fn path_free(&self, table: &[mounts::MountEntry], path: &Path) -> bool {
        !mounts::is_mount_point(table, &path.to_string_lossy()) && is_vacant_dir(path)
    }
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Type hint passed to `parted mkpart`.
fn parted_fs_type(file_system: FileSystem) -> &'static str {
    match file_system {
        FileSystem::Fat => "fat16",
        FileSystem::Fat32 => "fat32",
        _ => "ntfs",
    }
}

/// The `parted` script for a fresh GPT label with one Microsoft basic data
/// partition.
pub fn parted_script(device: &DeviceInfo, label: &str, plan: &PartitionPlan) -> Vec<String> {
    let start = format!("{}B", plan.offset);
    let end = plan
        .end()
        .map(|end| format!("{}B", end.saturating_sub(1)))
        .unwrap_or_else(|| "100%".to_string());
    let mut script = args(&["--script", &device.path, "--", "mklabel", "gpt", "mkpart"]);
    script.push(label.to_string());
    script.push(parted_fs_type(plan.file_system).to_string());
    script.push(start);
    script.push(end);
    script.extend(args(&["set", "1", "msftdata", "on", "p"]));
    script
}

impl Prober for LinuxBackend {
    fn probe(&self, device_id: &str) -> Result<Vec<DeviceInfo>> {
        let raw = self.lsblk(true, device_id)?;
        lsblk::parse_disks(&raw)
    }
}

impl PartitionReader for LinuxBackend {
    fn list_partitions(&self, device: &DeviceInfo) -> Result<Vec<PartitionInfo>> {
        let raw = self.lsblk(false, &device.id)?;
        lsblk::parse_partitions(&raw, &device.id)
    }
}

impl Partitioner for LinuxBackend {
    fn wipe(&self, device: &DeviceInfo) -> Result<()> {
        self.privileged("wipefs", &args(&["-a", &device.path]))?;
        Ok(())
    }

    fn convert_to_gpt(&self, device: &DeviceInfo) -> Result<()> {
        self.privileged("parted", &args(&["--script", &device.path, "mklabel", "gpt"]))?;
        Ok(())
    }

    fn create_partition(&self, device: &DeviceInfo, label: &str, plan: &PartitionPlan) -> Result<()> {
        self.privileged("parted", &parted_script(device, label, plan))?;
        Ok(())
    }

    fn tracks_mounts(&self) -> bool {
        true
    }
}

impl Formatter for LinuxBackend {
    fn supports(&self, file_system: FileSystem) -> bool {
        matches!(
            file_system,
            FileSystem::Fat | FileSystem::Fat32 | FileSystem::Ntfs | FileSystem::ExFat
        )
    }

    fn format(&self, partition: &PartitionInfo, file_system: FileSystem, label: &str) -> Result<()> {
        let path = partition.path.as_str();
        match file_system {
            FileSystem::Fat | FileSystem::Fat32 => {
                let bits = if file_system == FileSystem::Fat { "16" } else { "32" };
                self.privileged("mkfs", &args(&["-t", "vfat", "-F", bits, path]))?;
                if !label.is_empty() {
                    self.privileged("fatlabel", &args(&[path, label]))?;
                }
            }
            FileSystem::Ntfs => {
                self.privileged("mkfs", &args(&["-t", "ntfs", "--fast", "-L", label, path]))?;
            }
            FileSystem::ExFat => {
                self.privileged("mkfs", &args(&["-t", "exfat", "-n", label, path]))?;
            }
            other => {
                return Err(Error::new(
                    ErrorKind::UnsupportedFileSystem,
                    format!("mkfs cannot create {other}"),
                ))
            }
        }
        info!(partition = %partition.id, fs = %file_system, "formatted");
        Ok(())
    }
}

impl Mounter for LinuxBackend {
    fn free_access_paths(&self, partition: &PartitionInfo) -> Result<Vec<String>> {
        let table = mounts::read_mounts(&self.mount_table)?;
        Ok(self
            .candidate_dirs(partition)
            .into_iter()
            .filter(|dir| self.path_free(&table, dir))
            .map(|dir| dir.to_string_lossy().to_string())
            .collect())
    }

    fn access_path_free(&self, access_path: &str) -> Result<bool> {
        let table = mounts::read_mounts(&self.mount_table)?;
        Ok(self.path_free(&table, Path::new(access_path)))
    }

    fn mount(&self, partition: &PartitionInfo, access_path: &str) -> Result<String> {
        self.privileged("mkdir", &args(&["-p", access_path]))?;
        self.privileged(
            "mount",
            &args(&["--options", "rw,users,umask=000", &partition.path, access_path]),
        )?;
        Ok(access_path.to_string())
    }

    fn unmount(&self, partition: &PartitionInfo) -> Result<()> {
        self.privileged("umount", &args(&[&partition.mount]))?;
        let created_here = Path::new(&partition.mount)
            .file_name()
            .map(|name| name.to_string_lossy().contains(&partition.id))
            .unwrap_or(false);
        if created_here && !partition.id.is_empty() {
            debug!(dir = %partition.mount, "removing mount directory");
            self.privileged("rmdir", &args(&[&partition.mount]))?;
        }
        Ok(())
    }
}

impl Ejector for LinuxBackend {
    fn eject(&self, device: &DeviceInfo) -> Result<()> {
        self.run(
            "udisksctl",
            &args(&["power-off", "--no-user-interaction", "-b", &device.path]),
        )?;
        Ok(())
    }
}

impl Backend for LinuxBackend {
    fn name(&self) -> &'static str {
        "linux"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use unidisk_core::layout::{plan_partition, MAX_FAT32_PARTITION, PARTITION_OFFSET};
    use unidisk_core::{Device, ScriptedRunner, Storage};

    const GB: u64 = 1_000_000_000;

    const SDB_DISK: &str = r#"{"blockdevices":[{"kname":"sdb","label":null,"fstype":null,"pttype":"dos","type":"disk","size":64000000000,"hotplug":true,"mountpoint":null,"vendor":"SanDisk","model":"Ultra"}]}"#;
    const SDB_PARTS: &str = r#"{"blockdevices":[{"kname":"sdb","label":null,"fstype":null,"pttype":"dos","type":"disk","size":64000000000,"hotplug":true,"mountpoint":null,"vendor":"SanDisk","model":"Ultra","children":[{"kname":"sdb1","label":"OLD","fstype":"vfat","pttype":"dos","type":"part","size":63999000000,"hotplug":true,"mountpoint":"/media/old","vendor":null,"model":null}]}]}"#;
    const SDB_NEW: &str = r#"{"blockdevices":[{"kname":"sdb","label":null,"fstype":null,"pttype":"gpt","type":"disk","size":64000000000,"hotplug":true,"mountpoint":null,"vendor":"SanDisk","model":"Ultra","children":[{"kname":"sdb1","label":null,"fstype":null,"pttype":"gpt","type":"part","size":30644047616,"hotplug":true,"mountpoint":null,"vendor":null,"model":null}]}]}"#;

    fn backend(runner: &Arc<ScriptedRunner>, sudo: bool) -> LinuxBackend {
        LinuxBackend::new(
            runner.clone(),
            LinuxConfig {
                use_sudo: sudo,
                ..LinuxConfig::default()
            },
        )
    }

    fn strs(call: &[String]) -> Vec<&str> {
        call.iter().map(String::as_str).collect()
    }

    #[test]
    fn probe_scopes_lsblk_to_device() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok(SDB_DISK);
        let disks = backend(&runner, true).probe("sdb").unwrap();
        assert_eq!(disks[0].id, "sdb");
        assert_eq!(
            strs(&runner.calls()[0]),
            vec!["lsblk", "-d", "-o", lsblk::COLUMNS, "-b", "-J", "/dev/sdb"]
        );

        runner.push_ok(SDB_DISK);
        backend(&runner, true).probe("").unwrap();
        assert_eq!(runner.calls()[1].len(), 7);
    }

    #[test]
    fn lsblk_failure_is_backend_command() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_failure(32, "lsblk: /dev/sdz: not a block device");
        let err = backend(&runner, true).probe("sdz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendCommand);
        assert!(err.to_string().contains("not a block device"));
    }

    #[test]
    fn sudo_prefix_follows_config() {
        let disk = DeviceInfo {
            id: "sdb".to_string(),
            path: "/dev/sdb".to_string(),
            ..Default::default()
        };
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok("").push_ok("");
        backend(&runner, true).wipe(&disk).unwrap();
        backend(&runner, false).wipe(&disk).unwrap();
        let calls = runner.calls();
        assert_eq!(strs(&calls[0]), vec!["sudo", "wipefs", "-a", "/dev/sdb"]);
        assert_eq!(strs(&calls[1]), vec!["wipefs", "-a", "/dev/sdb"]);
    }

    #[test]
    fn parted_script_uses_plan_bounds() {
        let disk = DeviceInfo {
            id: "sdc".to_string(),
            path: "/dev/sdc".to_string(),
            size: 64 * GB,
            ..Default::default()
        };
        let capped = parted_script(&disk, "INSTALL", &plan_partition(disk.size, FileSystem::Fat32, None));
        assert_eq!(
            capped,
            args(&[
                "--script", "/dev/sdc", "--", "mklabel", "gpt", "mkpart", "INSTALL", "fat32",
                &format!("{PARTITION_OFFSET}B"),
                &format!("{}B", PARTITION_OFFSET + MAX_FAT32_PARTITION - 1),
                "set", "1", "msftdata", "on", "p",
            ])
        );

        let open = parted_script(&disk, "DATA", &plan_partition(disk.size, FileSystem::ExFat, None));
        assert_eq!(open[7], "ntfs");
        assert_eq!(open[9], "100%");
    }

    #[test]
    fn fat32_format_sets_label_separately() {
        let part = PartitionInfo {
            id: "sdb1".to_string(),
            path: "/dev/sdb1".to_string(),
            ..Default::default()
        };
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok("").push_ok("");
        backend(&runner, false).format(&part, FileSystem::Fat32, "INSTALLER").unwrap();
        let calls = runner.calls();
        assert_eq!(strs(&calls[0]), vec!["mkfs", "-t", "vfat", "-F", "32", "/dev/sdb1"]);
        assert_eq!(strs(&calls[1]), vec!["fatlabel", "/dev/sdb1", "INSTALLER"]);

        assert!(!backend(&runner, false).supports(FileSystem::Apfs));
    }

    #[test]
    fn access_paths_skip_mounted_and_occupied_dirs() {
        let root = tempfile::tempdir().unwrap();
        let table = root.path().join("mounts");
        let first = root.path().join("sdb1");
        let second = root.path().join("sdb1-1");
        fs::create_dir(&second).unwrap();
        fs::write(second.join("keep"), b"x").unwrap();
        fs::write(&table, format!("/dev/sda1 {} vfat rw 0 0\n", first.display())).unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let backend = LinuxBackend::new(
            runner,
            LinuxConfig {
                use_sudo: false,
                mount_root: root.path().to_path_buf(),
            },
        )
        .with_mount_table(&table);

        let part = PartitionInfo {
            id: "sdb1".to_string(),
            ..Default::default()
        };
        let pool = backend.free_access_paths(&part).unwrap();
        assert_eq!(pool[0], root.path().join("sdb1-2").to_string_lossy());
        assert_eq!(pool.len(), MOUNT_DIR_VARIANTS - 1);

        assert!(!backend.access_path_free(&first.to_string_lossy()).unwrap());
        assert!(!backend.access_path_free(&second.to_string_lossy()).unwrap());
        assert!(backend.access_path_free(&root.path().join("other").to_string_lossy()).unwrap());

        fs::remove_file(&table).unwrap();
        let err = backend.free_access_paths(&part).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessPath);
        let err = backend.access_path_free(&root.path().join("other").to_string_lossy()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessPath);
    }

    #[test]
    fn unmount_removes_only_library_dirs() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok("").push_ok("").push_ok("");
        let backend = backend(&runner, true);

        let mut part = PartitionInfo {
            id: "sdb1".to_string(),
            mount: "/mnt/sdb1".to_string(),
            ..Default::default()
        };
        backend.unmount(&part).unwrap();
        part.mount = "/media/stick".to_string();
        backend.unmount(&part).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(strs(&calls[0]), vec!["sudo", "umount", "/mnt/sdb1"]);
        assert_eq!(strs(&calls[1]), vec!["sudo", "rmdir", "/mnt/sdb1"]);
        assert_eq!(strs(&calls[2]), vec!["sudo", "umount", "/media/stick"]);
    }

    #[test]
    fn wipe_partition_format_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let table = root.path().join("mounts");
        fs::write(&table, "").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        runner
            .push_ok(SDB_DISK)
            .push_ok(SDB_PARTS)
            // wipe: umount, wipefs, parted mklabel
            .push_ok("")
            .push_ok("")
            .push_ok("")
            // partition: parted script, lsblk
            .push_ok("")
            .push_ok(SDB_NEW)
            // format: mkfs, fatlabel, mkdir, mount
            .push_ok("")
            .push_ok("")
            .push_ok("")
            .push_ok("")
            // dismount: umount, rmdir; eject
            .push_ok("")
            .push_ok("")
            .push_ok("");
        let backend: Arc<dyn Backend> = Arc::new(
            LinuxBackend::new(
                runner.clone(),
                LinuxConfig {
                    use_sudo: true,
                    mount_root: root.path().to_path_buf(),
                },
            )
            .with_mount_table(&table),
        );

        let mut device: Device = Storage::new(backend).open("sdb").unwrap();
        assert_eq!(device.partitions()[0].mount_point(), "/media/old");

        device.wipe().unwrap();
        assert!(device.partitions().is_empty());

        device.partition("INSTALLER").unwrap();
        assert_eq!(device.partitions().len(), 1);
        assert!(device.partitions()[0].size() <= MAX_FAT32_PARTITION);

        let part = &mut device.partitions_mut()[0];
        part.format("INSTALLER").unwrap();
        let expected = root.path().join("sdb1");
        assert_eq!(part.mount_point(), expected.to_string_lossy());

        device.dismount().unwrap();
        assert_eq!(device.partitions()[0].mount_point(), "");
        device.eject().unwrap();
        assert_eq!(device.identifier(), "");
        assert_eq!(device.eject().unwrap_err().kind(), ErrorKind::Input);
        assert_eq!(runner.remaining(), 0);

        let calls = runner.calls();
        assert_eq!(strs(&calls[12]), vec!["sudo", "rmdir", expected.to_str().unwrap()]);
        assert_eq!(
            strs(&calls[13]),
            vec!["udisksctl", "power-off", "--no-user-interaction", "-b", "/dev/sdb"]
        );
    }
}
