use fleet_shared::device::{Device, generate_uuid};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    commands::confirm_or_abort,
    error::ProvisionError,
    prompt::Prompter,
    provision::{Collaborators, InitRequest, Orchestrator},
    server::FleetApi,
};

/// Provision a new device end to end; returns its UUID.
pub async fn init(
    deps: Collaborators<'_>,
    request: InitRequest,
    shutdown: CancellationToken,
) -> Result<String, ProvisionError> {
    let uuid = Orchestrator::new(deps, request, shutdown).run().await?;
    info!("Done");
    Ok(uuid)
}

/// Register a device under `application` with `uuid`, or a fresh one.
pub async fn register(
    api: &dyn FleetApi,
    application: &str,
    uuid: Option<String>,
) -> Result<Device, ProvisionError> {
    let application = api.application(application).await?;
    let uuid = uuid.unwrap_or_else(generate_uuid);
    info!("Registering to {}: {}", application.name, uuid);
    Ok(api.register_device(&application.name, &uuid).await?)
}

pub async fn remove(
    api: &dyn FleetApi,
    prompter: &dyn Prompter,
    uuid: &str,
    yes: bool,
) -> Result<(), ProvisionError> {
    confirm_or_abort(prompter, yes, "Are you sure you want to delete the device?")?;
    api.remove_device(uuid).await?;
    Ok(())
}

/// Rename a device, asking for the new name when none was given.
pub async fn rename(
    api: &dyn FleetApi,
    prompter: &dyn Prompter,
    uuid: &str,
    name: Option<String>,
) -> Result<(), ProvisionError> {
    let name = match name {
        Some(name) => name,
        None => prompter.input("How do you want to name this device?")?,
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(ProvisionError::UserInput("device name cannot be empty".into()));
    }
    api.rename_device(uuid, name).await?;
    Ok(())
}
