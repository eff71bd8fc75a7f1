//! Command implementations behind the CLI.
//!
//! Every command takes its collaborators explicitly; [`Context`] wires the
//! real ones from the loaded [`Config`].

pub mod config;
pub mod device;
pub mod os;

use anyhow::Result;

use crate::{
    config::Config,
    config_blob::{ConfigBlob, DriveCodec},
    drive::{DriveGuard, SystemMountTable},
    error::ProvisionError,
    prompt::{Prompter, TerminalPrompter},
    server::HttpFleetApi,
};

pub const SELECT_DEVICE_DRIVE: &str = "Select the device drive";

pub struct Context {
    pub config: Config,
    pub api: HttpFleetApi,
    pub prompter: TerminalPrompter,
    pub mounts: SystemMountTable,
    pub codec: DriveCodec,
}

impl Context {
    pub fn new(config: Config) -> Result<Self> {
        let api = HttpFleetApi::new(&config)?;
        let codec = DriveCodec::new(&config);
        Ok(Self {
            config,
            api,
            prompter: TerminalPrompter::default(),
            mounts: SystemMountTable,
            codec,
        })
    }

    pub fn blob(&self) -> ConfigBlob<'_> {
        ConfigBlob::new(DriveGuard::new(&self.mounts), &self.codec)
    }
}

/// Ask before a destructive action unless `yes` was passed.
pub fn confirm_or_abort(prompter: &dyn Prompter, yes: bool, message: &str) -> Result<(), ProvisionError> {
    if yes || prompter.confirm(message)? {
        Ok(())
    } else {
        Err(ProvisionError::UserInput("Aborted".into()))
    }
}
