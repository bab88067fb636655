//! Environment constants and path utilities for whale.
//!
//! This module centralizes the fixed names, markers and defaults used throughout
//! the crate, making them easier to maintain and modify.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hidden per-project / per-user directory name
pub const WHALE_DIR_NAME: &str = ".whale";

/// Configuration file name inside [`WHALE_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "whale.toml";

/// Environment variable overriding the daemon address
pub const DOCKER_HOST_VAR: &str = "DOCKER_HOST";

/// Naming constants shared by the identifier codec
pub mod naming {
    /// Prefix marking a hex-encoded container name
    pub const CONTAINER_MARKER: &str = "whale-";

    /// Tag the daemon applies when none is given
    pub const DEFAULT_TAG: &str = "latest";

    /// Substitute for `:` in the display form of image references
    pub const TAG_SEPARATOR_ALIAS: char = '@';

    /// Repo tag the daemon reports for dangling images
    pub const UNTAGGED_IMAGE: &str = "<none>:<none>";

    /// Length of the short id shown to users
    pub const SHORT_ID_LEN: usize = 12;
}

/// Lifecycle defaults
pub mod lifecycle {
    use super::Duration;

    /// Graceful stop timeout used when none is configured
    pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(15);

    /// How many times a stale stopped container is recycled during `start`
    pub const MAX_START_RETRIES: u32 = 1;

    /// Daemon connection timeout in seconds
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 120;
}

/// Build the `.whale` directory path under a root directory
pub fn whale_dir_path(root: &Path) -> PathBuf {
    root.join(WHALE_DIR_NAME)
}

/// Build the project-local config file path (`./.whale/config.toml`)
pub fn local_config_file_path(root: &Path) -> PathBuf {
    whale_dir_path(root).join(CONFIG_FILE_NAME)
}

/// Build the user config file path (`~/.whale/config.toml`)
pub fn user_config_file_path(home: &Path) -> PathBuf {
    whale_dir_path(home).join(CONFIG_FILE_NAME)
}
