use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config_blob::ConfigBlob,
    error::ProvisionError,
    prompt::Prompter,
    provision::stage::{Stage, StageInvoker},
};

#[derive(Debug, Clone)]
pub struct ReconfigureRequest {
    pub device_type: String,
    pub drive: Option<PathBuf>,
    pub advanced: bool,
}

/// Re-run the configure stage against an already provisioned drive.
///
/// The device already exists remotely, so nothing is compensated here.
/// Returns the UUID read from the drive.
pub async fn reconfigure(
    blob: &ConfigBlob<'_>,
    stages: &dyn StageInvoker,
    prompter: &dyn Prompter,
    request: ReconfigureRequest,
    shutdown: &CancellationToken,
) -> Result<String, ProvisionError> {
    let drive = blob
        .guard()
        .acquire(request.drive, prompter, "Select the device drive")
        .await?;

    let document = blob.read(&drive, &request.device_type).await?;
    let uuid = document
        .uuid()
        .ok_or_else(|| {
            ProvisionError::InvalidConfig(format!(
                "no uuid in the configuration on {}",
                drive.path().display()
            ))
        })?
        .to_string();

    blob.guard().ensure_unmounted(&drive).await?;
    info!("Reconfiguring device {}", uuid);
    let stage = Stage::Configure {
        image: drive.path().to_path_buf(),
        uuid: uuid.clone(),
        advanced: request.advanced,
    };
    stages.invoke(&stage, shutdown).await?;
    Ok(uuid)
}
