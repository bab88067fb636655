//! # whale
//!
//! Idempotent lifecycle management for containers running on a Docker or
//! Podman daemon, plus decoders for the daemon's streaming wire formats.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: start/stop/restart/clean orchestration over an
//!   [`Engine`](container::Engine), name encoding, image operations and the
//!   lifecycle event feed
//! - **[`stream`]**: demultiplexing of attach/log byte streams and progress
//!   aggregation for pull/push/build
//! - **[`cli`]**: argument parsing, configuration discovery and table rendering
//!   for the `whale` binary
//! - **[`env`]**: fixed names and defaults
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use whale::container::{ContainerOrchestrator, LogOptions, StartOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = ContainerOrchestrator::new().await?;
//!
//!     let options = StartOptions::builder().image("alpine").args(["echo", "hi"]).build()?;
//!     orchestrator.start("greeter", &options).await?;
//!
//!     let output = orchestrator.attach("greeter", &LogOptions { all: true, follow: true }).await?;
//!     // Both sides must be read: an unread channel stalls the other one.
//!     let (stdout, stderr) = tokio::join!(output.stdout.read_to_end(), output.stderr.read_to_end());
//!     print!("{}", String::from_utf8_lossy(&stdout?));
//!     eprint!("{}", String::from_utf8_lossy(&stderr?));
//!     Ok(())
//! }
//! ```

/// Container lifecycle orchestration and image management.
pub mod container;

/// Decoders for multiplexed output and progress streams.
pub mod stream;

/// Command line interface support.
pub mod cli;

/// Environment constants and path utilities.
pub mod env;

pub use container::{
    ContainerClient, ContainerError, ContainerOrchestrator, Engine, ImageReference, NameCache,
    StartOptions, StopOptions,
};
pub use stream::{Demuxed, ProgressView, StreamError};
