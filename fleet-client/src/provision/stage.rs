//! Pipeline stages executed as isolated units.
//!
//! A stage is rendered as an `os ...` invocation of this same executable and
//! run in its own process, so the orchestrator only ever sees whether it
//! succeeded.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::Config,
    error::{ProvisionError, StageKind},
    util::subprocess::{SubprocessBuilder, describe_exit},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Download {
        device_type: String,
        output: PathBuf,
    },
    Configure {
        image: PathBuf,
        uuid: String,
        advanced: bool,
    },
    Initialize {
        image: PathBuf,
        device_type: String,
        drive: Option<PathBuf>,
        yes: bool,
    },
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Download { .. } => StageKind::Download,
            Stage::Configure { .. } => StageKind::Configure,
            Stage::Initialize { .. } => StageKind::Initialize,
        }
    }

    /// Arguments of the `os` subcommand implementing this stage.
    pub fn args(&self) -> Vec<String> {
        match self {
            Stage::Download {
                device_type,
                output,
            } => vec![
                "os".into(),
                "download".into(),
                device_type.clone(),
                "--output".into(),
                output.display().to_string(),
            ],
            Stage::Configure {
                image,
                uuid,
                advanced,
            } => {
                let mut args = vec![
                    "os".into(),
                    "configure".into(),
                    image.display().to_string(),
                    uuid.clone(),
                ];
                if *advanced {
                    args.push("--advanced".into());
                }
                args
            }
            Stage::Initialize {
                image,
                device_type,
                drive,
                yes,
            } => {
                let mut args = vec![
                    "os".into(),
                    "initialize".into(),
                    image.display().to_string(),
                    "--type".into(),
                    device_type.clone(),
                ];
                if let Some(drive) = drive {
                    args.push("--drive".into());
                    args.push(drive.display().to_string());
                }
                if *yes {
                    args.push("--yes".into());
                }
                args
            }
        }
    }
}

#[async_trait]
pub trait StageInvoker: Send + Sync {
    /// Run `stage` to completion. Once `shutdown` fires the stage is stopped
    /// and has ended by the time this returns [`ProvisionError::Interrupted`].
    async fn invoke(
        &self,
        stage: &Stage,
        shutdown: &CancellationToken,
    ) -> Result<(), ProvisionError>;
}

/// Runs stages as child processes of the current executable.
pub struct ProcessStageInvoker {
    exe: PathBuf,
    api_url: String,
}

impl ProcessStageInvoker {
    pub fn new(exe: PathBuf, config: &Config) -> Self {
        Self {
            exe,
            api_url: config.api_url().to_string(),
        }
    }

    pub fn current(config: &Config) -> Result<Self, ProvisionError> {
        let exe = std::env::current_exe()
            .map_err(|e| ProvisionError::io("failed to locate current executable", e))?;
        Ok(Self::new(exe, config))
    }

    pub fn exe(&self) -> &PathBuf {
        &self.exe
    }

    /// The command a stage runs as, without executing it.
    pub fn command(&self, stage: &Stage) -> SubprocessBuilder {
        SubprocessBuilder::new(&self.exe)
            .args(stage.args())
            .env("FLEET_API_URL", self.api_url.as_str())
    }
}

#[async_trait]
impl StageInvoker for ProcessStageInvoker {
    async fn invoke(
        &self,
        stage: &Stage,
        shutdown: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let kind = stage.kind();
        info!("Running {} stage", kind);
        let status = self
            .command(stage)
            .status_until(shutdown)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::Interrupted => ProvisionError::Interrupted,
                _ => ProvisionError::stage(kind, e.to_string()),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ProvisionError::stage(kind, describe_exit(&status)))
        }
    }
}
