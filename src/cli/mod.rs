//! CLI-specific functionality for whale
//!
//! This module contains argument parsing, configuration discovery and the
//! terminal rendering used by the binary.

pub mod args;
pub mod config;
pub mod render;

pub use args::{Action, Args, Commands};
pub use config::{ConfigDiscovery, DaemonConfig, StopConfig, WhaleConfig};
