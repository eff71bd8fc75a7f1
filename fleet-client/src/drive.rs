//! Drive resolution and the unmount guard every drive read/write goes through.

use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::{error::ProvisionError, prompt::Prompter};

/// A target storage medium: a block device, or a filesystem root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveHandle {
    path: PathBuf,
}

impl DriveHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queried from the mount table on every call.
    pub fn is_mounted(&self, mounts: &dyn MountTable) -> io::Result<bool> {
        Ok(!mounts.mount_points(&self.path)?.is_empty())
    }
}

/// Removable drive offered for interactive selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveCandidate {
    pub path: PathBuf,
    pub size: Option<String>,
    pub model: Option<String>,
}

impl DriveCandidate {
    pub fn describe(&self) -> String {
        let mut out = self.path.display().to_string();
        if let Some(size) = &self.size {
            out.push_str(&format!(" ({})", size));
        }
        if let Some(model) = &self.model {
            out.push_str(&format!(" - {}", model.trim()));
        }
        out
    }
}

#[async_trait]
pub trait MountTable: Send + Sync {
    /// Mount points of `device` and of its partitions.
    fn mount_points(&self, device: &Path) -> io::Result<Vec<PathBuf>>;

    async fn unmount(&self, mount_point: &Path) -> io::Result<()>;

    /// Removable drives available for selection.
    async fn drives(&self) -> io::Result<Vec<DriveCandidate>>;
}

pub struct DriveGuard<'a> {
    mounts: &'a dyn MountTable,
}

impl<'a> DriveGuard<'a> {
    pub fn new(mounts: &'a dyn MountTable) -> Self {
        Self { mounts }
    }

    /// Use `explicit` if given, otherwise ask the user to pick a drive.
    pub async fn acquire(
        &self,
        explicit: Option<PathBuf>,
        prompter: &dyn Prompter,
        message: &str,
    ) -> Result<DriveHandle, ProvisionError> {
        if let Some(path) = explicit {
            return Ok(DriveHandle::new(path));
        }
        let drives = self
            .mounts
            .drives()
            .await
            .map_err(|e| ProvisionError::io("failed to list drives", e))?;
        prompter.select_drive(message, &drives).map(DriveHandle::new)
    }

    /// Unmount everything mounted from `drive`. A no-op on an unmounted drive.
    pub async fn ensure_unmounted(&self, drive: &DriveHandle) -> Result<(), ProvisionError> {
        let context = || format!("failed to unmount {}", drive.path().display());

        let mount_points = self
            .mounts
            .mount_points(drive.path())
            .map_err(|e| ProvisionError::io(context(), e))?;
        for mount_point in &mount_points {
            info!("Unmounting {}", mount_point.display());
            self.mounts
                .unmount(mount_point)
                .await
                .map_err(|e| ProvisionError::io(context(), e))?;
        }

        if drive
            .is_mounted(self.mounts)
            .map_err(|e| ProvisionError::io(context(), e))?
        {
            return Err(ProvisionError::io(
                context(),
                io::Error::new(io::ErrorKind::ResourceBusy, "device is busy"),
            ));
        }
        debug!("{} is unmounted", drive.path().display());
        Ok(())
    }
}

pub struct SystemMountTable;

#[async_trait]
impl MountTable for SystemMountTable {
    fn mount_points(&self, device: &Path) -> io::Result<Vec<PathBuf>> {
        let device = std::fs::canonicalize(device).unwrap_or_else(|_| device.to_path_buf());
        let table = read_mount_table()?;
        Ok(parse_mount_table(&table)
            .into_iter()
            .filter(|(source, _)| is_device_or_partition(&device, source))
            .map(|(_, target)| target)
            .collect())
    }

    async fn unmount(&self, mount_point: &Path) -> io::Result<()> {
        let mut cmd = if cfg!(target_os = "macos") {
            let mut cmd = Command::new("diskutil");
            cmd.arg("unmount");
            cmd
        } else {
            Command::new("umount")
        };
        let output = cmd.arg(mount_point).output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::other(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    async fn drives(&self) -> io::Result<Vec<DriveCandidate>> {
        if !cfg!(target_os = "linux") {
            return Ok(Vec::new());
        }
        let output = Command::new("lsblk")
            .args(["-J", "-d", "-p", "-o", "NAME,SIZE,MODEL,RM,TYPE"])
            .output()
            .await?;
        if !output.status.success() {
            return Err(io::Error::other(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        parse_lsblk(&output.stdout)
    }
}

#[cfg(target_os = "linux")]
fn read_mount_table() -> io::Result<String> {
    std::fs::read_to_string("/proc/self/mounts")
}

#[cfg(not(target_os = "linux"))]
fn read_mount_table() -> io::Result<String> {
    let output = std::process::Command::new("mount").output()?;
    let text = String::from_utf8_lossy(&output.stdout);
    // "source on target (options)" -> "source target"
    Ok(text
        .lines()
        .filter_map(|line| {
            let (source, rest) = line.split_once(" on ")?;
            let (target, _) = rest.rsplit_once(" (")?;
            Some(format!("{} {}", source, target.replace(' ', "\\040")))
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

/// `(source, target)` pairs from a mounts(5) formatted table.
fn parse_mount_table(table: &str) -> Vec<(PathBuf, PathBuf)> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            Some((
                PathBuf::from(unescape_octal(source)),
                PathBuf::from(unescape_octal(target)),
            ))
        })
        .collect()
}

/// Decode the `\040`-style escapes used for whitespace in mount tables.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `/dev/sdb` owns `/dev/sdb1`; `/dev/mmcblk0` owns `/dev/mmcblk0p1`.
fn is_device_or_partition(device: &Path, source: &Path) -> bool {
    if source == device {
        return true;
    }
    let (Some(device), Some(source)) = (device.to_str(), source.to_str()) else {
        return false;
    };
    let Some(suffix) = source.strip_prefix(device) else {
        return false;
    };
    let digits = suffix.strip_prefix('p').unwrap_or(suffix);
    let digits = digits.strip_prefix('s').unwrap_or(digits);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

#[derive(Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    rm: serde_json::Value,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl LsblkDevice {
    fn removable(&self) -> bool {
        match &self.rm {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::String(s) => s == "1",
            serde_json::Value::Number(n) => n.as_u64() == Some(1),
            _ => false,
        }
    }
}

fn parse_lsblk(json: &[u8]) -> io::Result<Vec<DriveCandidate>> {
    let output: LsblkOutput = serde_json::from_slice(json).map_err(io::Error::other)?;
    Ok(output
        .blockdevices
        .into_iter()
        .filter(|d| d.kind.as_deref() == Some("disk") && d.removable())
        .map(|d| DriveCandidate {
            path: PathBuf::from(d.name),
            size: d.size,
            model: d.model,
        })
        .collect())
}
