//! The `os` stage commands `device init` runs as isolated sub-processes.

use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tracing::info;

use crate::{
    commands::confirm_or_abort,
    config_blob::{ConfigBlob, GenerateTarget, generate},
    drive::DriveHandle,
    error::ProvisionError,
    prompt::Prompter,
    server::FleetApi,
};

pub async fn download(
    api: &dyn FleetApi,
    device_type: &str,
    output: &Path,
) -> Result<u64, ProvisionError> {
    info!("Downloading {} image to {}", device_type, output.display());
    let bytes = api.download_image(device_type, output).await?;
    info!("The image was downloaded to {} ({} bytes)", output.display(), bytes);
    Ok(bytes)
}

#[derive(Debug, Clone)]
pub struct ConfigureRequest {
    pub image: PathBuf,
    pub uuid: String,
    pub advanced: bool,
}

/// Write a freshly generated `config.json` for `uuid` into `image`.
pub async fn configure(
    api: &dyn FleetApi,
    blob: &ConfigBlob<'_>,
    prompter: &dyn Prompter,
    api_url: &str,
    request: &ConfigureRequest,
) -> Result<(), ProvisionError> {
    let device = api.device(&request.uuid).await?;
    let manifest = api.manifest(&device.device_type).await?;
    let options: Vec<_> = manifest.visible_options(request.advanced).collect();
    let answers = prompter.ask_options(&options)?;

    let device_type = device.device_type.clone();
    let document = generate(
        &manifest.options,
        &answers,
        &GenerateTarget::Device(device),
        api_url,
    );
    blob.write(&DriveHandle::new(&request.image), &device_type, &document)
        .await?;
    info!("Configured {} for device {}", request.image.display(), request.uuid);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitializeRequest {
    pub image: PathBuf,
    pub device_type: String,
    pub drive: Option<PathBuf>,
    pub yes: bool,
}

/// Write `image` byte for byte onto the selected drive.
pub async fn initialize(
    blob: &ConfigBlob<'_>,
    prompter: &dyn Prompter,
    request: InitializeRequest,
) -> Result<u64, ProvisionError> {
    let drive = blob
        .guard()
        .acquire(request.drive, prompter, "Select a drive")
        .await?;
    confirm_or_abort(
        prompter,
        request.yes,
        &format!(
            "This will erase {}. Are you sure?",
            drive.path().display()
        ),
    )?;
    blob.guard().ensure_unmounted(&drive).await?;

    info!(
        "Writing {} image to {}",
        request.device_type,
        drive.path().display()
    );
    let written = write_image(&request.image, drive.path()).await?;
    blob.guard().ensure_unmounted(&drive).await?;
    info!("Wrote {} bytes to {}", written, drive.path().display());
    Ok(written)
}

async fn write_image(image: &Path, target: &Path) -> Result<u64, ProvisionError> {
    let mut source = File::open(image)
        .await
        .map_err(|e| ProvisionError::io(format!("failed to open {}", image.display()), e))?;
    let context = || format!("failed to write {}", target.display());
    // No truncate: the target is usually a block device.
    let mut dest = OpenOptions::new()
        .write(true)
        .open(target)
        .await
        .map_err(|e| ProvisionError::io(context(), e))?;

    let written = tokio::io::copy(&mut source, &mut dest)
        .await
        .map_err(|e| ProvisionError::io(context(), e))?;
    dest.sync_all()
        .await
        .map_err(|e| ProvisionError::io(context(), e))?;
    Ok(written)
}
