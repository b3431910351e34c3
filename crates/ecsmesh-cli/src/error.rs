//! Error types for the CLI

use std::path::PathBuf;

use ecsmesh_common::telemetry::TelemetryError;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Build(#[from] ecsmesh_common::Error),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("failed to read manifest {path}: {source}")]
    ReadManifest {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid manifest: {message}")]
    Manifest { message: String },
}

impl Error {
    pub fn manifest(message: impl Into<String>) -> Self {
        Error::Manifest {
            message: message.into(),
        }
    }
}
