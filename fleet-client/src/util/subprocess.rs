//! Subprocess execution using tokio.
//!
//! The child inherits the terminal and shares its process group, so it
//! receives SIGINT directly when the user presses Ctrl+C. A child is never
//! left running once the future driving it returns or is dropped.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long an interrupted child gets to exit on SIGINT before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Builder for running external commands.
#[derive(Debug, Clone)]
pub struct SubprocessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    grace_period: Duration,
}

impl SubprocessBuilder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spawn(&self) -> io::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        debug!("Running {}", self.command_line());
        cmd.spawn().map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to spawn {}: {}", self.program.display(), e),
            )
        })
    }

    /// Run the command to completion with inherited stdio.
    pub async fn status(self) -> io::Result<ExitStatus> {
        self.spawn()?.wait().await
    }

    /// Like [`status`](Self::status), but stop the child once `shutdown` fires.
    ///
    /// The child gets SIGINT and the grace period to exit, then SIGKILL. It has
    /// been reaped by the time this returns an [`io::ErrorKind::Interrupted`]
    /// error.
    pub async fn status_until(self, shutdown: &CancellationToken) -> io::Result<ExitStatus> {
        let mut child = self.spawn()?;
        tokio::select! {
            status = child.wait() => return status,
            _ = shutdown.cancelled() => {}
        }

        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            // Usually already delivered through the terminal's process group.
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGINT) {
                debug!("Could not forward SIGINT to {}: {}", pid, e);
            }
        }
        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                warn!(
                    "{} did not exit after interrupt, killing it",
                    self.program.display()
                );
                if let Err(e) = child.kill().await {
                    // e.g. a child running under sudo; it still got SIGINT.
                    warn!("Could not kill {}: {}, waiting for it", self.program.display(), e);
                    child.wait().await?;
                }
            }
        }
        Err(io::Error::new(
            io::ErrorKind::Interrupted,
            format!("{} was interrupted", self.program.display()),
        ))
    }
}

/// Human readable rendering of a non-success exit.
pub fn describe_exit(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with status {}", code),
        None => "terminated by signal".to_string(),
    }
}
