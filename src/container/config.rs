//! Lifecycle options and their translation into create specs.
//!
//! Provides a fluent API for describing how a container should be started,
//! and the mapping from those options onto what the daemon expects at create
//! time.

use crate::container::engine::{CreateSpec, HostSpec};
use crate::container::{ContainerError, Result};
use crate::env::lifecycle::DEFAULT_STOP_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Container network mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Share the host's network stack
    #[default]
    Host,
    /// Private network with published ports
    Bridge,
    /// No networking
    None,
}

impl NetworkMode {
    /// Name used by the daemon.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Host => "host",
            NetworkMode::Bridge => "bridge",
            NetworkMode::None => "none",
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "host" => Ok(NetworkMode::Host),
            "bridge" => Ok(NetworkMode::Bridge),
            "none" => Ok(NetworkMode::None),
            other => Err(ContainerError::ConfigError(format!(
                "Unknown network mode '{}' (expected host, bridge or none)",
                other
            ))),
        }
    }
}

/// Options for starting a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Image in display or daemon form; defaults to the container name
    pub image: Option<String>,
    /// Command arguments
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Container port to host port
    pub ports: BTreeMap<String, String>,
    /// Container path to host path
    pub volumes: BTreeMap<String, String>,
    /// Explicit network mode; derived from `ports` when absent
    pub network: Option<NetworkMode>,
    pub dns: Vec<String>,
    /// Treat an already running container as success
    pub force: bool,
}

impl StartOptions {
    /// Create a new options builder.
    pub fn builder() -> StartOptionsBuilder {
        StartOptionsBuilder::default()
    }

    /// Network mode the container will run with.
    pub fn network_mode(&self) -> NetworkMode {
        match self.network {
            Some(mode) => mode,
            None if self.ports.is_empty() => NetworkMode::Host,
            None => NetworkMode::Bridge,
        }
    }

    /// Translate into a create spec for `image` (daemon form).
    pub fn create_spec(&self, image: String) -> CreateSpec {
        let mut exposed_ports = Vec::with_capacity(self.ports.len());
        let mut port_bindings = BTreeMap::new();
        for (container_port, host_port) in &self.ports {
            let key = if container_port.contains('/') {
                container_port.clone()
            } else {
                format!("{}/tcp", container_port)
            };
            exposed_ports.push(key.clone());
            port_bindings.insert(key, host_port.clone());
        }

        let mut volumes = Vec::with_capacity(self.volumes.len());
        let mut binds = Vec::with_capacity(self.volumes.len());
        for (to, from) in &self.volumes {
            volumes.push(to.clone());
            binds.push(format!("{}:{}:rw", from, to));
        }

        CreateSpec {
            image,
            cmd: self.args.clone(),
            env: self
                .env
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect(),
            exposed_ports,
            volumes,
            host: HostSpec {
                network_mode: self.network_mode(),
                binds,
                port_bindings,
                dns: self.dns.clone(),
            },
        }
    }
}

/// Fluent builder for [`StartOptions`].
#[derive(Debug, Default)]
pub struct StartOptionsBuilder {
    options: StartOptions,
}

impl StartOptionsBuilder {
    /// Set the image.
    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.options.image = Some(image.into());
        self
    }

    /// Set the command arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Add an environment variable.
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.env.insert(key.into(), value.into());
        self
    }

    /// Publish a container port (`8080` or `53/udp`) on a host port.
    pub fn port<C: Into<String>, H: Into<String>>(mut self, container: C, host: H) -> Self {
        self.options.ports.insert(container.into(), host.into());
        self
    }

    /// Bind a host path into the container.
    pub fn volume<C: Into<String>, H: Into<String>>(mut self, container: C, host: H) -> Self {
        self.options.volumes.insert(container.into(), host.into());
        self
    }

    /// Set the network mode explicitly.
    pub fn network(mut self, mode: NetworkMode) -> Self {
        self.options.network = Some(mode);
        self
    }

    /// Add a DNS server.
    pub fn dns<S: Into<String>>(mut self, server: S) -> Self {
        self.options.dns.push(server.into());
        self
    }

    /// Succeed when the container is already running.
    pub fn force(mut self, force: bool) -> Self {
        self.options.force = force;
        self
    }

    /// Build the options.
    ///
    /// # Errors
    ///
    /// Returns error if an environment key, port or volume path is malformed.
    pub fn build(self) -> Result<StartOptions> {
        for key in self.options.env.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(ContainerError::ConfigError(format!(
                    "Invalid environment variable name '{}'",
                    key
                )));
            }
        }

        for (container, host) in &self.options.ports {
            let port = container.split('/').next().unwrap_or_default();
            if port.parse::<u16>().is_err() || host.parse::<u16>().is_err() {
                return Err(ContainerError::ConfigError(format!(
                    "Invalid port mapping '{}:{}'",
                    host, container
                )));
            }
        }

        for (container, host) in &self.options.volumes {
            if container.is_empty() || host.is_empty() {
                return Err(ContainerError::ConfigError(format!(
                    "Invalid volume mapping '{}:{}'",
                    host, container
                )));
            }
        }

        Ok(self.options)
    }
}

/// Options for stopping a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Treat a missing container as success
    pub force: bool,
    /// Graceful shutdown window; the daemon kills after it elapses
    pub wait: Option<Duration>,
}

impl StopOptions {
    /// Stop options that tolerate a missing container.
    pub fn forced() -> Self {
        Self {
            force: true,
            wait: None,
        }
    }

    /// Effective graceful shutdown window.
    pub fn wait_or(&self, default: Duration) -> Duration {
        self.wait.unwrap_or(default)
    }

    /// Effective graceful shutdown window with the built-in default.
    pub fn wait(&self) -> Duration {
        self.wait_or(DEFAULT_STOP_TIMEOUT)
    }
}

/// Options for reading container output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Replay everything logged so far before following
    pub all: bool,
    /// Keep the stream open for new output
    pub follow: bool,
}

/// Parse a `KEY=VALUE` pair.
///
/// # Errors
///
/// Returns error if there is no `=` or the key is empty.
pub fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    match pair.trim().split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(ContainerError::ConfigError(format!(
            "Expected KEY=VALUE, got '{}'",
            pair
        ))),
    }
}

/// Parse a `host:container` mapping into `(container, host)`.
///
/// Used for both `-p` and `-v`. Windows-style drive letters are not handled.
///
/// # Errors
///
/// Returns error if either side is missing.
pub fn parse_mapping(mapping: &str) -> Result<(String, String)> {
    match mapping.trim().split_once(':') {
        Some((host, container)) if !host.is_empty() && !container.is_empty() => {
            Ok((container.to_string(), host.to_string()))
        }
        _ => Err(ContainerError::ConfigError(format!(
            "Expected HOST:CONTAINER, got '{}'",
            mapping
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_defaults_to_host() {
        let options = StartOptions::builder().image("alpine").build().unwrap();
        let spec = options.create_spec("alpine".to_string());
        assert_eq!(spec.host.network_mode, NetworkMode::Host);
    }

    #[test]
    fn test_ports_select_bridge_network() {
        let options = StartOptions::builder()
            .port("80", "8080")
            .port("53/udp", "5353")
            .build()
            .unwrap();
        let spec = options.create_spec("nginx".to_string());

        assert_eq!(spec.host.network_mode, NetworkMode::Bridge);
        assert_eq!(spec.exposed_ports, vec!["53/udp", "80/tcp"]);
        assert_eq!(spec.host.port_bindings.get("80/tcp").map(String::as_str), Some("8080"));
        assert_eq!(spec.host.port_bindings.get("53/udp").map(String::as_str), Some("5353"));
    }

    #[test]
    fn test_explicit_network_wins() {
        let options = StartOptions::builder()
            .port("80", "8080")
            .network(NetworkMode::None)
            .build()
            .unwrap();
        assert_eq!(options.network_mode(), NetworkMode::None);
    }

    #[test]
    fn test_env_and_volumes_translation() {
        let options = StartOptions::builder()
            .env("FOO", "bar")
            .env("EMPTY", "")
            .volume("/data", "/srv/data")
            .args(["redis-server", "--appendonly", "yes"])
            .dns("1.1.1.1")
            .build()
            .unwrap();
        let spec = options.create_spec("redis:7".to_string());

        assert_eq!(spec.image, "redis:7");
        assert_eq!(spec.cmd, vec!["redis-server", "--appendonly", "yes"]);
        assert_eq!(spec.env, vec!["EMPTY=", "FOO=bar"]);
        assert_eq!(spec.volumes, vec!["/data"]);
        assert_eq!(spec.host.binds, vec!["/srv/data:/data:rw"]);
        assert_eq!(spec.host.dns, vec!["1.1.1.1"]);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let result = StartOptions::builder().env("", "x").build();
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));

        let result = StartOptions::builder().port("http", "80").build();
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));

        let result = StartOptions::builder().volume("", "/srv").build();
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[test]
    fn test_network_mode_parsing() {
        assert_eq!("bridge".parse::<NetworkMode>().unwrap(), NetworkMode::Bridge);
        assert_eq!(NetworkMode::Host.to_string(), "host");
        assert!("overlay".parse::<NetworkMode>().is_err());
    }

    #[test]
    fn test_stop_wait_default() {
        assert_eq!(StopOptions::default().wait(), Duration::from_secs(15));
        let options = StopOptions {
            force: false,
            wait: Some(Duration::from_secs(2)),
        };
        assert_eq!(options.wait(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_cli_pairs() {
        assert_eq!(
            parse_env_pair("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_env_pair("novalue").is_err());
        assert_eq!(
            parse_mapping("8080:80").unwrap(),
            ("80".to_string(), "8080".to_string())
        );
        assert_eq!(
            parse_mapping("/srv:/data").unwrap(),
            ("/data".to_string(), "/srv".to_string())
        );
        assert!(parse_mapping(":80").is_err());
    }
}
