use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, ResultExt};

/// Runtime knobs shared by every backend. Missing JSON fields take the
/// defaults below.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Mount a lone partition during search so its label can be read.
    pub assign_access_paths_on_search: bool,
    pub linux: LinuxConfig,
    pub windows: WindowsConfig,
}

impl StorageConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read(path)
            .kind_context(ErrorKind::Input, || format!("reading config {}", path.display()))?;
        serde_json::from_slice(&raw)
            .kind_context(ErrorKind::Unmarshal, || format!("parsing config {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinuxConfig {
    /// Prefix privileged tools with `sudo`.
    pub use_sudo: bool,
    /// Parent directory for generated mount points.
    pub mount_root: PathBuf,
}

impl Default for LinuxConfig {
    fn default() -> Self {
        Self {
            use_sudo: true,
            mount_root: PathBuf::from("/mnt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    pub error_action: ErrorAction,
    /// Drive letters never handed out as access paths.
    pub reserved_letters: String,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            error_action: ErrorAction::Continue,
            reserved_letters: "ABCDE".to_string(),
        }
    }
}

/// Value written to `$ErrorActionPreference` before every PowerShell script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorAction {
    #[default]
    Continue,
    Stop,
    SilentlyContinue,
}

impl ErrorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorAction::Continue => "Continue",
            ErrorAction::Stop => "Stop",
            ErrorAction::SilentlyContinue => "SilentlyContinue",
        }
    }
}
