//! `/proc/self/mounts` bookkeeping for access-path allocation.

use std::fs;
use std::path::Path;

use unidisk_core::{ErrorKind, Result, ResultExt};

pub const PROC_MOUNTS: &str = "/proc/self/mounts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub mount_point: String,
    pub fs_type: String,
}

/// Reads a mount table. Without it no directory can be proven free.
pub fn read_mounts(table: &Path) -> Result<Vec<MountEntry>> {
    let data = fs::read_to_string(table)
        .kind_context(ErrorKind::AccessPath, || format!("reading {}", table.display()))?;
    Ok(parse_mounts(&data))
}

pub fn parse_mounts(data: &str) -> Vec<MountEntry> {
    let mut mounts = Vec::new();
    for line in data.lines() {
        let mut parts = line.split_whitespace();
        let (Some(source), Some(mount_point), Some(fs_type)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        mounts.push(MountEntry {
            source: unescape_mount(source),
            mount_point: unescape_mount(mount_point),
            fs_type: fs_type.to_string(),
        });
    }
    mounts
}

pub fn is_mount_point(mounts: &[MountEntry], path: &str) -> bool {
    let path = path.trim_end_matches('/');
    mounts.iter().any(|entry| entry.mount_point.trim_end_matches('/') == path)
}

/// Decodes the octal escapes (`\040` for space) the kernel uses in mount tables.
pub fn unescape_mount(value: &str) -> String {
    let mut output = String::new();
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            let mut octal = String::new();
            for _ in 0..3 {
                if let Some(next) = chars.peek() {
                    if next.is_ascii_digit() {
                        octal.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
            }
            if octal.len() == 3 {
                if let Ok(byte) = u8::from_str_radix(&octal, 8) {
                    output.push(byte as char);
                    continue;
                }
            }
            output.push('\\');
            output.push_str(&octal);
        } else {
            output.push(ch);
        }
    }
    output
}
