use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure of a call against the fleet API. Surfaced verbatim.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("failed to write download to {path}: {source}")]
    Download {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Named pipeline stages run as isolated units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Download,
    Configure,
    Initialize,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::Download => "download",
            StageKind::Configure => "configure",
            StageKind::Initialize => "initialize",
        })
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{0}")]
    UserInput(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} stage failed: {message}")]
    Stage { stage: StageKind, message: String },

    #[error("elevated command failed: {0}")]
    Privilege(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("interrupted")]
    Interrupted,

    /// The device could not be deregistered after a later stage failed.
    #[error("{original} (removing device {uuid} also failed: {compensation})")]
    Compensation {
        uuid: String,
        original: Box<ProvisionError>,
        compensation: RemoteError,
    },
}

impl ProvisionError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn stage(stage: StageKind, message: impl Into<String>) -> Self {
        ProvisionError::Stage {
            stage,
            message: message.into(),
        }
    }
}
