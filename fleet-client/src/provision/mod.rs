//! Device provisioning: the `device init` pipeline and drive reconfiguration.

pub mod orchestrator;
pub mod privileged;
pub mod reconfigure;
pub mod stage;
pub mod temp;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::{Collaborators, InitRequest, Orchestrator, ProvisionState};
pub use reconfigure::{ReconfigureRequest, reconfigure};
