//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./whale.toml or ./.whale/config.toml
//! 2. User config: ~/.whale/config.toml
//! 3. System config: /etc/whale/config.toml
//! 4. Built-in defaults
//!
//! `DOCKER_HOST` overrides the configured daemon address.

use crate::container::{ContainerClientConfig, ContainerOrchestratorConfig, RegistryAuth};
use crate::env;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Daemon connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// `unix://`, `tcp://` or `http://` address; local defaults when unset
    pub host: Option<String>,
    /// Connection timeout in seconds
    pub timeout: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout: env::lifecycle::DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Graceful stop window in seconds
    pub wait_secs: u64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            wait_secs: env::lifecycle::DEFAULT_STOP_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleConfig {
    pub daemon: DaemonConfig,
    /// Default registry credentials for pull and push
    pub registry: RegistryAuth,
    pub stop: StopConfig,
}

impl WhaleConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: WhaleConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Apply `DOCKER_HOST` and an explicit command line host, in that order.
    pub fn with_overrides(mut self, docker_host: Option<String>, cli_host: Option<String>) -> Self {
        if let Some(host) = docker_host.filter(|h| !h.is_empty()) {
            debug!("Using daemon address from {}: {}", env::DOCKER_HOST_VAR, host);
            self.daemon.host = Some(host);
        }
        if let Some(host) = cli_host {
            self.daemon.host = Some(host);
        }
        self
    }

    pub fn client_config(&self) -> ContainerClientConfig {
        ContainerClientConfig {
            host: self.daemon.host.clone(),
            timeout: self.daemon.timeout,
        }
    }

    pub fn orchestrator_config(&self) -> ContainerOrchestratorConfig {
        ContainerOrchestratorConfig {
            stop_timeout: Duration::from_secs(self.stop.wait_secs),
        }
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> anyhow::Result<WhaleConfig> {
        let config = match Self::find_config_file() {
            Some(config_path) => {
                info!("Loading configuration from: {:?}", config_path);
                WhaleConfig::from_toml_file(config_path)?
            }
            None => {
                debug!("No configuration file found, using defaults");
                WhaleConfig::default()
            }
        };
        Ok(config.with_overrides(std_env::var(env::DOCKER_HOST_VAR).ok(), None))
    }

    /// Load an explicit file, still honouring `DOCKER_HOST`
    pub fn load(path: &Path) -> anyhow::Result<WhaleConfig> {
        let config = WhaleConfig::from_toml_file(path)?;
        Ok(config.with_overrides(std_env::var(env::DOCKER_HOST_VAR).ok(), None))
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = Self::get_config_candidates();

        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Get list of configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        // 1. Current directory: ./whale.toml, ./.whale/config.toml
        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        // 2. User config: ~/.whale/config.toml
        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        // 3. System config
        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/whale/config.toml"));

        #[cfg(windows)]
        if let Ok(program_data) = std_env::var("PROGRAMDATA") {
            candidates.push(PathBuf::from(program_data).join("whale").join("config.toml"));
        }

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        let candidates = Self::get_config_candidates();
        for (i, candidate) in candidates.iter().enumerate() {
            let status = if candidate.exists() {
                if candidate.is_file() {
                    "✓ EXISTS"
                } else {
                    "✗ NOT A FILE"
                }
            } else {
                "✗ NOT FOUND"
            };

            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        if let Some(found) = Self::find_config_file() {
            println!("Active configuration: {:?}", found);
        } else {
            println!("Active configuration: Built-in defaults");
        }
        if let Ok(host) = std_env::var(env::DOCKER_HOST_VAR) {
            println!("{} override: {}", env::DOCKER_HOST_VAR, host);
        }
    }
}
