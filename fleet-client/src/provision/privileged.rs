use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::Config,
    error::ProvisionError,
    util::subprocess::{SubprocessBuilder, describe_exit},
};

pub const INITIALIZE_JUSTIFICATION: &str = "Initializing a device requires administrative permissions\n\
given that we need to access raw devices directly.";

/// Runs a command of this executable with elevated OS privileges.
#[async_trait]
pub trait Elevate: Send + Sync {
    /// `justification` is shown to the user before elevation is requested.
    /// The elevated process has exited by the time this returns, including
    /// when `shutdown` fires.
    async fn run_elevated(
        &self,
        args: &[String],
        justification: &str,
        shutdown: &CancellationToken,
    ) -> Result<(), ProvisionError>;
}

pub struct Elevator {
    exe: PathBuf,
    elevation_command: String,
    is_root: bool,
}

impl Elevator {
    pub fn new(exe: PathBuf, elevation_command: impl Into<String>, is_root: bool) -> Self {
        Self {
            exe,
            elevation_command: elevation_command.into(),
            is_root,
        }
    }

    pub fn from_config(exe: PathBuf, config: &Config) -> Self {
        Self::new(
            exe,
            config.elevation_command.clone(),
            nix::unistd::geteuid().is_root(),
        )
    }

    pub fn command(&self, args: &[String]) -> SubprocessBuilder {
        if self.is_root {
            SubprocessBuilder::new(&self.exe).args(args.iter().cloned())
        } else {
            SubprocessBuilder::new(&self.elevation_command)
                .args(std::iter::once(self.exe.display().to_string()))
                .args(args.iter().cloned())
        }
    }
}

#[async_trait]
impl Elevate for Elevator {
    async fn run_elevated(
        &self,
        args: &[String],
        justification: &str,
        shutdown: &CancellationToken,
    ) -> Result<(), ProvisionError> {
        let command = self.command(args);
        if !self.is_root {
            eprintln!("{}", justification);
        }
        info!("Running elevated: {}", command.command_line());

        let status = command
            .status_until(shutdown)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::Interrupted => ProvisionError::Interrupted,
                _ => ProvisionError::Privilege(e.to_string()),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ProvisionError::Privilege(describe_exit(&status)))
        }
    }
}
