//! In-memory collaborators for exercising the pipeline in tests.

use async_trait::async_trait;
use fleet_shared::{
    application::Application,
    device::Device,
    manifest::{ConfigOption, DeviceManifest},
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    drive::{DriveCandidate, MountTable},
    error::{ProvisionError, RemoteError, StageKind},
    prompt::Prompter,
    provision::{privileged::Elevate, stage::Stage, stage::StageInvoker},
    server::FleetApi,
};

#[derive(Default)]
pub struct FakeApi {
    applications: Vec<Application>,
    devices: Mutex<BTreeMap<String, Device>>,
    registered: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    remove_attempts: Mutex<usize>,
    removal_error: Mutex<Option<RemoteError>>,
    registration_error: Mutex<Option<RemoteError>>,
    cancel_on_register: Mutex<Option<CancellationToken>>,
    manifest_options: Vec<ConfigOption>,
}

impl FakeApi {
    pub fn with_app(name: &str, device_type: &str) -> Self {
        Self {
            applications: vec![Application::new(1, name, device_type)],
            ..Self::default()
        }
    }

    pub fn with_manifest_options(mut self, options: Vec<ConfigOption>) -> Self {
        self.manifest_options = options;
        self
    }

    pub fn fail_removal(&self, err: RemoteError) {
        *self.removal_error.lock().unwrap() = Some(err);
    }

    pub fn fail_registration(&self, err: RemoteError) {
        *self.registration_error.lock().unwrap() = Some(err);
    }

    /// Cancel `token` after the device is created but before the call returns,
    /// as a Ctrl+C arriving while the response is in flight would.
    pub fn cancel_on_register(&self, token: CancellationToken) {
        *self.cancel_on_register.lock().unwrap() = Some(token);
    }

    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn remove_attempts(&self) -> usize {
        *self.remove_attempts.lock().unwrap()
    }

    pub fn exists(&self, uuid: &str) -> bool {
        self.devices.lock().unwrap().contains_key(uuid)
    }

    pub fn insert_device(&self, device: Device) {
        self.devices
            .lock()
            .unwrap()
            .insert(device.uuid.clone(), device);
    }
}

pub fn device(uuid: &str, application: &str, device_type: &str) -> Device {
    serde_json::from_value(serde_json::json!({
        "uuid": uuid,
        "name": format!("device-{}", &uuid[..uuid.len().min(4)]),
        "device_type": device_type,
        "application_name": application,
    }))
    .unwrap()
}

#[async_trait]
impl FleetApi for FakeApi {
    async fn applications(&self) -> Result<Vec<Application>, RemoteError> {
        Ok(self.applications.clone())
    }

    async fn application(&self, name: &str) -> Result<Application, RemoteError> {
        self.applications
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("application {}", name)))
    }

    async fn devices(&self, application: Option<&str>) -> Result<Vec<Device>, RemoteError> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .values()
            .filter(|d| application.is_none_or(|app| d.application_name == app))
            .cloned()
            .collect())
    }

    async fn device(&self, uuid: &str) -> Result<Device, RemoteError> {
        self.devices
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("device {}", uuid)))
    }

    async fn register_device(
        &self,
        application: &str,
        uuid: &str,
    ) -> Result<Device, RemoteError> {
        if let Some(err) = self.registration_error.lock().unwrap().take() {
            return Err(err);
        }
        let app = self.application(application).await?;
        let device = device(uuid, &app.name, &app.device_type);
        self.insert_device(device.clone());
        self.registered.lock().unwrap().push(uuid.to_string());
        if let Some(token) = self.cancel_on_register.lock().unwrap().take() {
            token.cancel();
        }
        Ok(device)
    }

    async fn remove_device(&self, uuid: &str) -> Result<(), RemoteError> {
        *self.remove_attempts.lock().unwrap() += 1;
        if let Some(err) = self.removal_error.lock().unwrap().take() {
            return Err(err);
        }
        self.devices
            .lock()
            .unwrap()
            .remove(uuid)
            .ok_or_else(|| RemoteError::NotFound(format!("device {}", uuid)))?;
        self.removed.lock().unwrap().push(uuid.to_string());
        Ok(())
    }

    async fn rename_device(&self, uuid: &str, name: &str) -> Result<(), RemoteError> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices
            .get_mut(uuid)
            .ok_or_else(|| RemoteError::NotFound(format!("device {}", uuid)))?;
        device.name = name.to_string();
        Ok(())
    }

    async fn identify_device(&self, uuid: &str) -> Result<(), RemoteError> {
        self.device(uuid).await.map(|_| ())
    }

    async fn reboot_device(&self, uuid: &str) -> Result<(), RemoteError> {
        self.device(uuid).await.map(|_| ())
    }

    async fn manifest(&self, device_type: &str) -> Result<DeviceManifest, RemoteError> {
        Ok(DeviceManifest {
            slug: device_type.to_string(),
            name: device_type.to_string(),
            options: self.manifest_options.clone(),
        })
    }

    async fn download_image(&self, device_type: &str, output: &Path) -> Result<u64, RemoteError> {
        let contents = format!("image:{}", device_type);
        std::fs::write(output, &contents).map_err(|source| RemoteError::Download {
            path: output.to_path_buf(),
            source,
        })?;
        Ok(contents.len() as u64)
    }
}

/// Records stage invocations; optionally fails one stage kind.
#[derive(Default)]
pub struct FakeStages {
    invoked: Mutex<Vec<Stage>>,
    paths: Mutex<Vec<PathBuf>>,
    failure: Option<(StageKind, String)>,
}

impl FakeStages {
    pub fn failing(kind: StageKind, message: &str) -> Self {
        Self {
            failure: Some((kind, message.to_string())),
            ..Self::default()
        }
    }

    pub fn invoked(&self) -> Vec<Stage> {
        self.invoked.lock().unwrap().clone()
    }

    /// Image paths seen by stages, each checked to exist when invoked.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageInvoker for FakeStages {
    async fn invoke(
        &self,
        stage: &Stage,
        shutdown: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        self.invoked.lock().unwrap().push(stage.clone());
        let path = match stage {
            Stage::Download { output, .. } => output,
            Stage::Configure { image, .. } | Stage::Initialize { image, .. } => image,
        };
        assert!(path.exists(), "stage ran without its image path");
        self.paths.lock().unwrap().push(path.clone());
        if shutdown.is_cancelled() {
            return Err(ProvisionError::Interrupted);
        }

        match &self.failure {
            Some((kind, message)) if *kind == stage.kind() => {
                Err(ProvisionError::stage(*kind, message.clone()))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct FakeElevator {
    denied: bool,
    calls: Mutex<Vec<(Vec<String>, String)>>,
}

impl FakeElevator {
    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(Vec<String>, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Elevate for FakeElevator {
    async fn run_elevated(
        &self,
        args: &[String],
        justification: &str,
        shutdown: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        self.calls
            .lock()
            .unwrap()
            .push((args.to_vec(), justification.to_string()));
        if shutdown.is_cancelled() {
            Err(ProvisionError::Interrupted)
        } else if self.denied {
            Err(ProvisionError::Privilege("exited with status 1".into()))
        } else {
            Ok(())
        }
    }
}

/// Always picks the first entry and answers with the scripted values.
#[derive(Default)]
pub struct ScriptedPrompter {
    pub answers: Map<String, Value>,
    pub confirm: bool,
    pub text: String,
}

impl Prompter for ScriptedPrompter {
    fn select_application(&self, applications: &[Application]) -> Result<String, ProvisionError> {
        applications
            .first()
            .map(|a| a.name.clone())
            .ok_or_else(|| ProvisionError::UserInput("You don't have any applications".into()))
    }

    fn select_drive(
        &self,
        _message: &str,
        drives: &[DriveCandidate],
    ) -> Result<PathBuf, ProvisionError> {
        drives
            .first()
            .map(|d| d.path.clone())
            .ok_or_else(|| ProvisionError::UserInput("No available drives were detected".into()))
    }

    fn ask_options(&self, options: &[&ConfigOption]) -> Result<Map<String, Value>, ProvisionError> {
        Ok(options
            .iter()
            .filter_map(|o| self.answers.get(&o.name).map(|v| (o.name.clone(), v.clone())))
            .collect())
    }

    fn confirm(&self, _message: &str) -> Result<bool, ProvisionError> {
        Ok(self.confirm)
    }

    fn input(&self, _message: &str) -> Result<String, ProvisionError> {
        Ok(self.text.clone())
    }
}

/// Mount table where unmounting succeeds unless the drive is marked busy.
#[derive(Default)]
pub struct FakeMounts {
    mounted: Mutex<BTreeMap<PathBuf, Vec<PathBuf>>>,
    busy: bool,
    unmounts: Mutex<usize>,
    drives: Vec<DriveCandidate>,
}

impl FakeMounts {
    pub fn mounted(device: &Path, mount_points: &[&str]) -> Self {
        let fake = Self::default();
        fake.mounted.lock().unwrap().insert(
            device.to_path_buf(),
            mount_points.iter().map(PathBuf::from).collect(),
        );
        fake
    }

    pub fn busy(device: &Path) -> Self {
        let mut fake = Self::mounted(device, &["/media/busy"]);
        fake.busy = true;
        fake
    }

    pub fn with_drives(mut self, drives: Vec<DriveCandidate>) -> Self {
        self.drives = drives;
        self
    }

    pub fn unmounts(&self) -> usize {
        *self.unmounts.lock().unwrap()
    }
}

#[async_trait]
impl MountTable for FakeMounts {
    fn mount_points(&self, device: &Path) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .mounted
            .lock()
            .unwrap()
            .get(device)
            .cloned()
            .unwrap_or_default())
    }

    async fn unmount(&self, mount_point: &Path) -> io::Result<()> {
        *self.unmounts.lock().unwrap() += 1;
        if self.busy {
            return Ok(());
        }
        for points in self.mounted.lock().unwrap().values_mut() {
            points.retain(|p| p != mount_point);
        }
        Ok(())
    }

    async fn drives(&self) -> io::Result<Vec<DriveCandidate>> {
        Ok(self.drives.clone())
    }
}
