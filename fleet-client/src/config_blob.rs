//! Reading and writing `config.json` on a drive.
//!
//! Every drive access goes through [`DriveGuard::ensure_unmounted`] first.
//! Where the document lives on the drive is up to the [`ConfigCodec`]:
//! a directory is treated as the boot filesystem itself, anything else as a
//! partitioned image or block device.

use async_trait::async_trait;
use fleet_shared::{
    application::Application, config::ConfigDocument, device::Device, manifest::ConfigOption,
};
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::{
    config::Config,
    drive::{DriveGuard, DriveHandle},
    error::ProvisionError,
    partition,
    provision::temp::with_temp_path,
    util::subprocess::{SubprocessBuilder, describe_exit},
};

#[async_trait]
pub trait ConfigCodec: Send + Sync {
    async fn read(
        &self,
        drive: &DriveHandle,
        device_type: &str,
    ) -> Result<ConfigDocument, ProvisionError>;

    async fn write(
        &self,
        drive: &DriveHandle,
        device_type: &str,
        document: &ConfigDocument,
    ) -> Result<(), ProvisionError>;
}

/// Codec for drives exposed as a filesystem root (an extracted or mounted
/// boot partition). The document location is looked up per device type.
pub struct FilesystemCodec {
    config: Config,
}

impl FilesystemCodec {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn resolve(&self, drive: &DriveHandle, device_type: &str) -> Result<PathBuf, ProvisionError> {
        let root = drive.path();
        if !root.is_dir() {
            return Err(ProvisionError::io(
                format!("cannot access config on {}", root.display()),
                io::Error::new(io::ErrorKind::Unsupported, "not a filesystem root"),
            ));
        }
        Ok(root.join(self.config.config_location(device_type)))
    }
}

#[async_trait]
impl ConfigCodec for FilesystemCodec {
    async fn read(
        &self,
        drive: &DriveHandle,
        device_type: &str,
    ) -> Result<ConfigDocument, ProvisionError> {
        let path = self.resolve(drive, device_type)?;
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ProvisionError::io(format!("failed to read {}", path.display()), e))?;
        parse_document(&path, &contents)
    }

    async fn write(
        &self,
        drive: &DriveHandle,
        device_type: &str,
        document: &ConfigDocument,
    ) -> Result<(), ProvisionError> {
        let path = self.resolve(drive, device_type)?;
        let contents = document
            .to_json()
            .map_err(|e| ProvisionError::InvalidConfig(e.to_string()))?;
        write_atomic(&path, contents.as_bytes())
            .map_err(|e| ProvisionError::io(format!("failed to write {}", path.display()), e))
    }
}

/// Codec for disk images and raw block devices. The document is copied in
/// and out of the FAT boot partition with mtools, which needs no mounting.
pub struct PartitionCodec {
    config: Config,
    mcopy: PathBuf,
}

impl PartitionCodec {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            mcopy: PathBuf::from("mcopy"),
        }
    }

    /// `<image>@@<offset>` and `::/<location>` as mtools expects them.
    fn target(
        &self,
        drive: &DriveHandle,
        device_type: &str,
    ) -> Result<(String, String), ProvisionError> {
        let number = self.config.boot_partition(device_type);
        let partition = partition::find_partition(drive.path(), number).map_err(|e| {
            ProvisionError::io(
                format!(
                    "failed to locate partition {} on {}",
                    number,
                    drive.path().display()
                ),
                e,
            )
        })?;
        let location = self.config.config_location(device_type);
        Ok((
            format!("{}@@{}", drive.path().display(), partition.offset),
            format!("::/{}", location.display()),
        ))
    }

    async fn mcopy(&self, image: &str, from: &str, to: &str) -> Result<(), ProvisionError> {
        let command = SubprocessBuilder::new(&self.mcopy)
            .args(["-n", "-o", "-i", image, from, to])
            .env("MTOOLS_SKIP_CHECK", "1");
        let command_line = command.command_line();
        let status = command
            .status()
            .await
            .map_err(|e| ProvisionError::io("failed to run mcopy", e))?;
        if status.success() {
            Ok(())
        } else {
            Err(ProvisionError::io(
                format!("{} failed", command_line),
                io::Error::other(describe_exit(&status)),
            ))
        }
    }
}

#[async_trait]
impl ConfigCodec for PartitionCodec {
    async fn read(
        &self,
        drive: &DriveHandle,
        device_type: &str,
    ) -> Result<ConfigDocument, ProvisionError> {
        let (image, location) = self.target(drive, device_type)?;
        let contents = with_temp_path(|scratch| {
            let scratch = scratch.to_path_buf();
            let (image, location) = (&image, &location);
            async move {
                self.mcopy(image, location, &scratch.display().to_string())
                    .await?;
                tokio::fs::read_to_string(&scratch)
                    .await
                    .map_err(|e| ProvisionError::io(format!("failed to read {}", location), e))
            }
        })
        .await?;
        parse_document(Path::new(&location), &contents)
    }

    async fn write(
        &self,
        drive: &DriveHandle,
        device_type: &str,
        document: &ConfigDocument,
    ) -> Result<(), ProvisionError> {
        let (image, location) = self.target(drive, device_type)?;
        let contents = document
            .to_json()
            .map_err(|e| ProvisionError::InvalidConfig(e.to_string()))?;
        with_temp_path(|scratch| {
            let scratch = scratch.to_path_buf();
            let (image, location) = (&image, &location);
            async move {
                tokio::fs::write(&scratch, contents.as_bytes())
                    .await
                    .map_err(|e| ProvisionError::io("failed to write scratch file", e))?;
                self.mcopy(image, &scratch.display().to_string(), location)
                    .await
            }
        })
        .await
    }
}

/// Picks [`FilesystemCodec`] for directories and [`PartitionCodec`] otherwise.
pub struct DriveCodec {
    filesystem: FilesystemCodec,
    partition: PartitionCodec,
}

impl DriveCodec {
    pub fn new(config: &Config) -> Self {
        Self {
            filesystem: FilesystemCodec::new(config),
            partition: PartitionCodec::new(config),
        }
    }

    fn codec_for(&self, drive: &DriveHandle) -> &dyn ConfigCodec {
        if drive.path().is_dir() {
            &self.filesystem
        } else {
            &self.partition
        }
    }
}

#[async_trait]
impl ConfigCodec for DriveCodec {
    async fn read(
        &self,
        drive: &DriveHandle,
        device_type: &str,
    ) -> Result<ConfigDocument, ProvisionError> {
        self.codec_for(drive).read(drive, device_type).await
    }

    async fn write(
        &self,
        drive: &DriveHandle,
        device_type: &str,
        document: &ConfigDocument,
    ) -> Result<(), ProvisionError> {
        self.codec_for(drive).write(drive, device_type, document).await
    }
}

fn parse_document(path: &Path, contents: &str) -> Result<ConfigDocument, ProvisionError> {
    ConfigDocument::from_json(contents)
        .map_err(|e| ProvisionError::InvalidConfig(format!("{}: {}", path.display(), e)))
}

/// Write through a sibling temp file so readers never see a partial document.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub struct ConfigBlob<'a> {
    guard: DriveGuard<'a>,
    codec: &'a dyn ConfigCodec,
}

impl<'a> ConfigBlob<'a> {
    pub fn new(guard: DriveGuard<'a>, codec: &'a dyn ConfigCodec) -> Self {
        Self { guard, codec }
    }

    pub fn guard(&self) -> &DriveGuard<'a> {
        &self.guard
    }

    pub async fn read(
        &self,
        drive: &DriveHandle,
        device_type: &str,
    ) -> Result<ConfigDocument, ProvisionError> {
        self.guard.ensure_unmounted(drive).await?;
        self.codec.read(drive, device_type).await
    }

    pub async fn write(
        &self,
        drive: &DriveHandle,
        device_type: &str,
        document: &ConfigDocument,
    ) -> Result<(), ProvisionError> {
        self.guard.ensure_unmounted(drive).await?;
        self.codec.write(drive, device_type, document).await
    }

    /// Read, deep-set `key`, write back. Returns the written document.
    pub async fn write_key(
        &self,
        drive: &DriveHandle,
        device_type: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<ConfigDocument, ProvisionError> {
        let mut document = self.read(drive, device_type).await?;
        let value = value.into();
        info!("Setting {} to {}", key, value);
        document.set(key, value);
        self.write(drive, device_type, &document).await?;
        Ok(document)
    }

    /// Replace the document on the drive with the one stored in `file`.
    pub async fn inject(
        &self,
        drive: &DriveHandle,
        device_type: &str,
        file: &Path,
    ) -> Result<ConfigDocument, ProvisionError> {
        self.guard.ensure_unmounted(drive).await?;
        let contents = tokio::fs::read_to_string(file)
            .await
            .map_err(|e| ProvisionError::io(format!("failed to read {}", file.display()), e))?;
        let document = parse_document(file, &contents)?;
        self.write(drive, device_type, &document).await?;
        Ok(document)
    }
}

/// What a generated document is for.
#[derive(Debug, Clone)]
pub enum GenerateTarget {
    Device(Device),
    Application(Application),
}

impl GenerateTarget {
    pub fn device_type(&self) -> &str {
        match self {
            GenerateTarget::Device(device) => &device.device_type,
            GenerateTarget::Application(app) => &app.device_type,
        }
    }
}

/// Build a fresh document from the target, option defaults, and answers.
pub fn generate(
    options: &[ConfigOption],
    answers: &Map<String, Value>,
    target: &GenerateTarget,
    api_url: &str,
) -> ConfigDocument {
    let mut document = ConfigDocument::new();
    document.set("apiEndpoint", api_url);
    document.set("deviceType", target.device_type());
    match target {
        GenerateTarget::Device(device) => {
            document.set("applicationName", device.application_name.as_str());
            document.set("uuid", device.uuid.as_str());
            if let Some(id) = device.id {
                document.set("deviceId", id);
            }
        }
        GenerateTarget::Application(app) => {
            document.set("applicationName", app.name.as_str());
            document.set("applicationId", app.id);
        }
    }

    for option in options {
        if let Some(default) = &option.default {
            document.set(&option.name, default.clone());
        }
    }
    for (key, value) in answers {
        document.set(key, value.clone());
    }
    document
}
