//! The `device init` state machine.
//!
//! ```text
//! SelectingApplication -> Downloading -> Registering -> Configuring -> Initializing -> Done
//!          \                  \              \               \               \
//!           +------------------+--------------+---> Failed    +---------------+--> RolledBack
//! ```
//!
//! A failure before a device exists ends in `Failed`. A failure once the
//! device is registered deregisters it first and ends in `RolledBack`, or in
//! `Failed` if the deregistration itself fails. The temporary image is
//! released on every terminal transition.

use fleet_shared::{application::Application, device::Device, device::generate_uuid};
use std::future::Future;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    error::ProvisionError,
    prompt::Prompter,
    provision::{
        privileged::{Elevate, INITIALIZE_JUSTIFICATION},
        stage::{Stage, StageInvoker},
        temp::TempImage,
    },
    server::FleetApi,
    util::shutdown::until_shutdown,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionState {
    SelectingApplication,
    Downloading,
    Registering,
    Configuring,
    Initializing,
    Done { uuid: String },
    RolledBack,
    Failed,
}

impl ProvisionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisionState::Done { .. } | ProvisionState::RolledBack | ProvisionState::Failed
        )
    }
}

/// What the user asked `device init` for.
#[derive(Debug, Clone, Default)]
pub struct InitRequest {
    pub application: Option<String>,
    pub drive: Option<PathBuf>,
    pub advanced: bool,
    pub yes: bool,
}

/// State scoped to one orchestrator run.
#[derive(Debug, Default)]
pub struct ProvisioningSession {
    pub application: Option<Application>,
    pub image: Option<TempImage>,
    pub device: Option<Device>,
    pub advanced: bool,
}

/// Collaborators the orchestrator drives.
pub struct Collaborators<'a> {
    pub api: &'a dyn FleetApi,
    pub stages: &'a dyn StageInvoker,
    pub elevator: &'a dyn Elevate,
    pub prompter: &'a dyn Prompter,
}

pub struct Orchestrator<'a> {
    deps: Collaborators<'a>,
    request: InitRequest,
    shutdown: CancellationToken,
    state: ProvisionState,
    session: ProvisioningSession,
}

/// Await `fut` unless `shutdown` fires first. Only for calls without
/// side effects that outlive the dropped future.
async fn interruptible<T>(
    shutdown: &CancellationToken,
    fut: impl Future<Output = Result<T, ProvisionError>>,
) -> Result<T, ProvisionError> {
    until_shutdown(shutdown, fut)
        .await
        .unwrap_or(Err(ProvisionError::Interrupted))
}

impl<'a> Orchestrator<'a> {
    pub fn new(deps: Collaborators<'a>, request: InitRequest, shutdown: CancellationToken) -> Self {
        let session = ProvisioningSession {
            advanced: request.advanced,
            ..ProvisioningSession::default()
        };
        Self {
            deps,
            request,
            shutdown,
            state: ProvisionState::SelectingApplication,
            session,
        }
    }

    pub fn state(&self) -> &ProvisionState {
        &self.state
    }

    pub fn session(&self) -> &ProvisioningSession {
        &self.session
    }

    /// Drive the pipeline to a terminal state; returns the new device UUID.
    pub async fn run(mut self) -> Result<String, ProvisionError> {
        while !self.state.is_terminal() {
            self.step().await?;
        }
        match self.state {
            ProvisionState::Done { uuid } => Ok(uuid),
            state => Err(ProvisionError::UserInput(format!(
                "provisioning ended in state {:?}",
                state
            ))),
        }
    }

    /// Apply exactly one transition.
    pub async fn step(&mut self) -> Result<(), ProvisionError> {
        let next = match self.state {
            ProvisionState::SelectingApplication => self.select_application().await,
            ProvisionState::Downloading => self.download().await,
            ProvisionState::Registering => self.register().await,
            ProvisionState::Configuring => self.configure().await,
            ProvisionState::Initializing => self.initialize().await,
            ProvisionState::Done { .. } | ProvisionState::RolledBack | ProvisionState::Failed => {
                return Ok(());
            }
        };

        match next {
            Ok(state) => {
                if state.is_terminal() {
                    self.release_image();
                }
                info!("device init: {:?} -> {:?}", self.state, state);
                self.state = state;
                Ok(())
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn select_application(&mut self) -> Result<ProvisionState, ProvisionError> {
        let name = match &self.request.application {
            Some(name) => name.clone(),
            None => {
                let applications = interruptible(&self.shutdown, async {
                    self.deps.api.applications().await.map_err(ProvisionError::from)
                })
                .await?;
                self.deps.prompter.select_application(&applications)?
            }
        };
        let application = interruptible(&self.shutdown, async {
            self.deps.api.application(&name).await.map_err(ProvisionError::from)
        })
        .await?;
        let image = TempImage::acquire()
            .map_err(|e| ProvisionError::io("failed to allocate temporary image", e))?;

        self.session.application = Some(application);
        self.session.image = Some(image);
        Ok(ProvisionState::Downloading)
    }

    async fn download(&mut self) -> Result<ProvisionState, ProvisionError> {
        let stage = Stage::Download {
            device_type: self.application()?.device_type.clone(),
            output: self.image_path()?,
        };
        self.deps.stages.invoke(&stage, &self.shutdown).await?;
        Ok(ProvisionState::Registering)
    }

    async fn register(&mut self) -> Result<ProvisionState, ProvisionError> {
        let application = self.application()?.name.clone();
        let uuid = generate_uuid();
        info!("Registering to {}: {}", application, uuid);
        // Not raced against shutdown: a dropped request may still have
        // created the device, and only a known device can be removed again.
        let device = self
            .deps
            .api
            .register_device(&application, &uuid)
            .await?;
        self.session.device = Some(device);
        if self.shutdown.is_cancelled() {
            return Err(ProvisionError::Interrupted);
        }
        Ok(ProvisionState::Configuring)
    }

    async fn configure(&mut self) -> Result<ProvisionState, ProvisionError> {
        let stage = Stage::Configure {
            image: self.image_path()?,
            uuid: self.device_uuid()?,
            advanced: self.session.advanced,
        };
        self.deps.stages.invoke(&stage, &self.shutdown).await?;
        Ok(ProvisionState::Initializing)
    }

    async fn initialize(&mut self) -> Result<ProvisionState, ProvisionError> {
        let stage = Stage::Initialize {
            image: self.image_path()?,
            device_type: self.application()?.device_type.clone(),
            drive: self.request.drive.clone(),
            yes: self.request.yes,
        };
        let args = stage.args();
        self.deps
            .elevator
            .run_elevated(&args, INITIALIZE_JUSTIFICATION, &self.shutdown)
            .await?;
        Ok(ProvisionState::Done {
            uuid: self.device_uuid()?,
        })
    }

    /// Move to a terminal failure state, compensating if a device exists.
    async fn fail(&mut self, err: ProvisionError) -> ProvisionError {
        warn!("device init failed while {:?}: {}", self.state, err);

        let result = match self.session.device.take() {
            None => {
                self.state = ProvisionState::Failed;
                err
            }
            Some(device) => {
                warn!("Removing device {} after failed provisioning", device.uuid);
                match self.deps.api.remove_device(&device.uuid).await {
                    Ok(()) => {
                        self.state = ProvisionState::RolledBack;
                        err
                    }
                    Err(compensation) => {
                        warn!("Failed to remove device {}: {}", device.uuid, compensation);
                        self.state = ProvisionState::Failed;
                        self.session.device = Some(device.clone());
                        ProvisionError::Compensation {
                            uuid: device.uuid,
                            original: Box::new(err),
                            compensation,
                        }
                    }
                }
            }
        };
        self.release_image();
        result
    }

    fn release_image(&mut self) {
        if let Some(image) = self.session.image.take() {
            // A leftover temp file is logged by release(), never fatal.
            let _ = image.release();
        }
    }

    fn application(&self) -> Result<&Application, ProvisionError> {
        self.session
            .application
            .as_ref()
            .ok_or_else(|| ProvisionError::UserInput("no application selected".into()))
    }

    fn image_path(&self) -> Result<PathBuf, ProvisionError> {
        self.session
            .image
            .as_ref()
            .map(|image| image.path().to_path_buf())
            .ok_or_else(|| ProvisionError::UserInput("no temporary image allocated".into()))
    }

    fn device_uuid(&self) -> Result<String, ProvisionError> {
        self.session
            .device
            .as_ref()
            .map(|device| device.uuid.clone())
            .ok_or_else(|| ProvisionError::UserInput("no device registered".into()))
    }
}
