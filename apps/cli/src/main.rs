use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use unidisk_core::{
    Backend, Device, FileSystem, FormatOptions, Inventory, Partition, PartitionRequest,
    StorageConfig, Storage,
};

/// Inspect and prepare removable storage.
#[derive(Debug, Parser)]
#[command(name = "unidisk", version, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Raise log verbosity (RUST_LOG takes precedence)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List devices and their partitions
    List {
        /// Only this device
        #[arg(long, default_value = "")]
        id: String,
        /// Smallest device size in bytes
        #[arg(long, default_value_t = 0)]
        min_size: u64,
        /// Largest device size in bytes, 0 for no limit
        #[arg(long, default_value_t = 0)]
        max_size: u64,
        /// Include fixed disks
        #[arg(long)]
        all: bool,
        /// Print an inventory snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pick a partition by size and file system
    Select {
        device: String,
        #[arg(long, default_value_t = 0)]
        min_size: u64,
        #[arg(long)]
        fs: Option<FileSystem>,
    },
    /// Erase every partition and relabel the disk GPT
    Wipe {
        device: String,
        #[arg(long)]
        yes: bool,
    },
    /// Create a single partition on a wiped disk
    Partition {
        device: String,
        #[arg(long, default_value = "")]
        label: String,
        #[arg(long, default_value = "fat32")]
        fs: FileSystem,
        /// Partition size in bytes; defaults to the whole disk
        #[arg(long)]
        size: Option<u64>,
        #[arg(long)]
        yes: bool,
    },
    /// Format a partition
    Format {
        device: String,
        /// Partition identifier; defaults to the first partition
        #[arg(long)]
        partition: Option<String>,
        #[arg(long, default_value = "")]
        label: String,
        #[arg(long, default_value = "fat32")]
        fs: FileSystem,
        /// Leave the volume unmounted
        #[arg(long)]
        no_mount: bool,
        #[arg(long)]
        yes: bool,
    },
    /// Mount a partition
    Mount {
        device: String,
        #[arg(long)]
        partition: Option<String>,
        /// Access path to use instead of the first free one
        #[arg(long, default_value = "")]
        at: String,
    },
    /// Release every access path on a device
    Dismount { device: String },
    /// Power off or detach a device
    Eject { device: String },
    /// List the top-level entries of a mounted partition
    Contents {
        device: String,
        #[arg(long)]
        partition: Option<String>,
    },
    /// Delete every file on a mounted partition
    Erase {
        device: String,
        #[arg(long)]
        partition: Option<String>,
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => StorageConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StorageConfig::default(),
    };
    let storage = Storage::with_config(native_backend(&config)?, config);
    run(&storage, cli.command)
}

fn init_tracing(verbose: u8) {
    let default = if verbose > 0 { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn native_backend(config: &StorageConfig) -> Result<Arc<dyn Backend>> {
    #[cfg(target_os = "linux")]
    {
        let runner = Arc::new(unidisk_core::SystemRunner);
        return Ok(Arc::new(unidisk_host_linux::LinuxBackend::new(
            runner,
            config.linux.clone(),
        )));
    }
    #[cfg(target_os = "macos")]
    {
        let _ = config;
        return Ok(Arc::new(unidisk_host_macos::MacosBackend::default()));
    }
    #[cfg(windows)]
    {
        let runner = Arc::new(unidisk_core::SystemRunner);
        return Ok(Arc::new(unidisk_host_windows::WindowsBackend::new(
            runner,
            config.windows.clone(),
        )));
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    {
        let _ = config;
        Err(anyhow!("unsupported OS for storage management"))
    }
}

fn confirm(yes: bool, action: &str, device: &Device) -> Result<()> {
    if !yes {
        bail!(
            "{action} destroys data on {} ({}); pass --yes to continue",
            device.identifier(),
            device.friendly_name()
        );
    }
    Ok(())
}

fn find_partition<'a>(device: &'a mut Device, id: Option<&str>) -> Result<&'a mut Partition> {
    match id {
        Some(id) => device
            .partitions_mut()
            .iter_mut()
            .find(|part| part.identifier() == id)
            .ok_or_else(|| anyhow!("no partition {id}")),
        None => Ok(device.select_partition(0, None)?),
    }
}

fn print_device(device: &Device) {
    println!(
        "{}\t{}\t{} bytes\t{}\t{}",
        device.identifier(),
        device.path(),
        device.size(),
        device.partition_style(),
        device.friendly_name()
    );
    for part in device.partitions() {
        print_partition(part);
    }
}

fn print_partition(part: &Partition) {
    let mount = if part.mount_point().is_empty() {
        "-"
    } else {
        part.mount_point()
    };
    println!(
        "  {}\t{}\t{} bytes\t{}\t{}",
        part.identifier(),
        part.file_system(),
        part.size(),
        mount,
        part.label()
    );
}

fn run(storage: &Storage, command: Commands) -> Result<()> {
    match command {
        Commands::List {
            id,
            min_size,
            max_size,
            all,
            json,
        } => {
            let devices = storage.search(&id, min_size, max_size, !all)?;
            if json {
                let inventory = Inventory::new(storage.backend().name(), &devices);
                println!("{}", serde_json::to_string_pretty(&inventory)?);
            } else {
                devices.iter().for_each(print_device);
            }
        }
        Commands::Select {
            device,
            min_size,
            fs,
        } => {
            let mut device = storage.open(&device)?;
            let part = device.select_partition(min_size, fs)?;
            print_partition(part);
        }
        Commands::Wipe { device, yes } => {
            let mut device = storage.open(&device)?;
            confirm(yes, "wipe", &device)?;
            device.wipe()?;
        }
        Commands::Partition {
            device,
            label,
            fs,
            size,
            yes,
        } => {
            let mut device = storage.open(&device)?;
            confirm(yes, "partition", &device)?;
            let request = PartitionRequest {
                file_system: fs,
                size,
                ..PartitionRequest::new(label)
            };
            device.partition_with(&request)?;
            print_device(&device);
        }
        Commands::Format {
            device,
            partition,
            label,
            fs,
            no_mount,
            yes,
        } => {
            let mut device = storage.open(&device)?;
            confirm(yes, "format", &device)?;
            let part = find_partition(&mut device, partition.as_deref())?;
            let options = FormatOptions {
                mount_after: !no_mount,
            };
            part.format_with(fs, &label, options)?;
            print_partition(part);
        }
        Commands::Mount {
            device,
            partition,
            at,
        } => {
            let mut device = storage.open(&device)?;
            let part = find_partition(&mut device, partition.as_deref())?;
            part.mount(&at)?;
            print_partition(part);
        }
        Commands::Dismount { device } => {
            storage.open(&device)?.dismount()?;
        }
        Commands::Eject { device } => {
            storage.open(&device)?.eject()?;
        }
        Commands::Contents { device, partition } => {
            let mut device = storage.open(&device)?;
            let part = find_partition(&mut device, partition.as_deref())?;
            for entry in part.contents()? {
                println!("{}", entry.display());
            }
        }
        Commands::Erase {
            device,
            partition,
            yes,
        } => {
            let mut device = storage.open(&device)?;
            confirm(yes, "erase", &device)?;
            find_partition(&mut device, partition.as_deref())?.erase()?;
        }
    }
    Ok(())
}
