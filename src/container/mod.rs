//! Container lifecycle management on top of the Docker/Podman API.
//!
//! This module drives idempotent start/stop/restart operations against a
//! daemon whose state is always re-read before a mutation, and exposes the
//! daemon's streaming responses (logs, progress, events) as plain streams.
//!
//! ## Architecture
//!
//! - [`engine`]: the [`Engine`] seam every daemon operation goes through
//! - [`client`]: bollard-backed [`Engine`] implementation with connection management
//! - [`naming`]: reversible container-name and image-reference encoding
//! - [`config`]: start/stop options and their translation into create specs
//! - [`orchestrator`]: the start/stop/restart state machine, `clean`, `ps`, logs
//! - [`image`]: pull/push/build/list/remove
//! - [`events`]: lifecycle event feed with cached id-to-name resolution
//! - [`testing`]: in-memory [`Engine`] for tests and dry runs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use whale::container::{ContainerOrchestrator, StartOptions, StopOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = ContainerOrchestrator::new().await?;
//!
//!     let options = StartOptions::builder()
//!         .image("redis:7")
//!         .port("6379", "6379")
//!         .build()?;
//!
//!     orchestrator.start("my cache", &options).await?;
//!     orchestrator.stop("my cache", &StopOptions::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod events;
pub mod image;
pub mod naming;
pub mod orchestrator;
pub mod testing;

pub use client::{ContainerClient, ContainerClientConfig, RuntimeType};
pub use config::{LogOptions, NetworkMode, StartOptions, StartOptionsBuilder, StopOptions};
pub use engine::{CreateSpec, Engine, HostSpec, RawEvent};
pub use events::{EventResolver, LifecycleEvent, NameCache};
pub use image::{BuildOptions, ImageManager, ImageSummary, RegistryAuth};
pub use naming::ImageReference;
pub use orchestrator::{
    CleanReport, ContainerOrchestrator, ContainerOrchestratorConfig, ResourceDetail,
    ResourceState, ResourceSummary,
};

use crate::stream::StreamError;

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Daemon unreachable or returned an unexpected failure
    #[error("Container API error: {0}")]
    Transport(#[from] bollard::errors::Error),

    /// Container or image does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Container already running or already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed stream framing or an error reported inside a stream
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A stale container could not be recycled during start
    #[error("Could not start container {0}: stale container survived recovery")]
    RecoveryExhausted(String),

    /// Image reference does not match the repository/name/tag grammar
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Invalid options or configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ContainerError {
    /// Classify a daemon error for the object named `subject`.
    ///
    /// 404 becomes [`ContainerError::NotFound`] and 409 becomes
    /// [`ContainerError::Conflict`]; everything else stays a transport error.
    pub fn from_api(err: bollard::errors::Error, subject: &str) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => ContainerError::NotFound(subject.to_string()),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => ContainerError::Conflict(format!("{}: {}", subject, message)),
            e => ContainerError::Transport(e),
        }
    }

    /// Whether this error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContainerError::NotFound(_))
    }
}

impl From<StreamError> for ContainerError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Transport(msg) => {
                ContainerError::IoError(std::io::Error::other(msg))
            }
            e => ContainerError::Protocol(e.to_string()),
        }
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_classification() {
        let not_found = ContainerError::from_api(
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message: "no such container".to_string(),
            },
            "web",
        );
        assert!(not_found.is_not_found());

        let conflict = ContainerError::from_api(
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message: "name in use".to_string(),
            },
            "web",
        );
        assert!(matches!(conflict, ContainerError::Conflict(msg) if msg == "web: name in use"));

        let other = ContainerError::from_api(
            bollard::errors::Error::DockerResponseServerError {
                status_code: 500,
                message: "boom".to_string(),
            },
            "web",
        );
        assert!(matches!(other, ContainerError::Transport(_)));
    }

    #[test]
    fn test_stream_errors_map_to_protocol() {
        let err: ContainerError = StreamError::UnknownChannel(9).into();
        assert!(matches!(err, ContainerError::Protocol(_)));

        let err: ContainerError = StreamError::Transport("reset".to_string()).into();
        assert!(matches!(err, ContainerError::IoError(_)));
    }
}
