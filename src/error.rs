use itertools::Itertools;
use thiserror::Error;

use crate::types::HealthStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("service `{service}` does not declare an image")]
    ImageNameMissing { service: String },

    #[error("service `{service}` declares more than one image: [{}]", .images.join(", "))]
    MultipleImageNamesProvided {
        service: String,
        images: Vec<String>,
    },

    #[error("networks with the same name cannot be created for the same environment, duplicated: [{}]", .names.join(", "))]
    DuplicateNetworkDefinition { names: Vec<String> },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("service `{service}` attaches to undeclared network `{network}`")]
    UnknownNetwork { service: String, network: String },

    #[error("service `{service}` did not become healthy in time (last status: {last_status})")]
    HealthCheckTimeout {
        service: String,
        last_status: HealthStatus,
    },

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("`{command}` failed: {message}")]
    Runtime { command: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{} disposal(s) failed: {}", .0.len(), .0.iter().join("; "))]
    Disposal(Vec<Error>),

    /// Initialization failed and so did removing what it had created.
    #[error("{source}; cleanup also failed: {}", .disposal.iter().join("; "))]
    Initialization {
        source: Box<Error>,
        disposal: Vec<Error>,
    },
}

impl Error {
    pub fn is_configuration(&self) -> bool {
        if let Error::Initialization { source, .. } = self {
            return source.is_configuration();
        }
        matches!(
            self,
            Error::ImageNameMissing { .. }
                | Error::MultipleImageNamesProvided { .. }
                | Error::DuplicateNetworkDefinition { .. }
                | Error::InvalidOperation(_)
                | Error::InvalidArgument(_)
                | Error::UnknownNetwork { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Initialization { source, .. } => source.is_timeout(),
            other => matches!(other, Error::HealthCheckTimeout { .. }),
        }
    }
}
