//! Docker/Podman client over bollard.
//!
//! Provides the [`Engine`] implementation used outside of tests, with
//! connection fallbacks, health checking, and translation between bollard's
//! models and the crate's records.

use crate::container::config::LogOptions;
use crate::container::engine::{
    ByteStream, CreateSpec, Engine, EventStream, ImageRecord, InspectRecord, MessageStream,
    RawEvent, ResourceRecord,
};
use crate::container::image::RegistryAuth;
use crate::container::{ContainerError, Result};
use crate::env::lifecycle::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::stream::{Channel, ErrorDetail, ProgressEvent, encode_frame};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::{EventMessageTypeEnum, PushImageInfo};
use bollard::service::{HostConfig, PortBinding};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Container client configuration.
#[derive(Debug, Clone)]
pub struct ContainerClientConfig {
    /// Daemon address (`unix://`, `tcp://` or `http://`); local defaults when unset
    pub host: Option<String>,
    /// Connection timeout in seconds
    pub timeout: u64,
}

impl Default for ContainerClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Docker/Podman API client.
///
/// Manages the connection to a Docker or Podman daemon with automatic
/// fallback and health checking.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
}

impl ContainerClient {
    /// Connect with default configuration.
    ///
    /// Tries Docker first, then falls back to Podman if available.
    ///
    /// # Errors
    ///
    /// Returns error if neither Docker nor Podman is reachable.
    pub async fn new() -> Result<Self> {
        Self::with_config(ContainerClientConfig::default()).await
    }

    /// Connect with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to the container runtime fails.
    pub async fn with_config(config: ContainerClientConfig) -> Result<Self> {
        let docker = match &config.host {
            Some(host) => Self::connect_to(host, config.timeout)?,
            None => Self::connect(config.timeout)?,
        };

        let client = Self {
            docker: Arc::new(docker),
        };

        // Verify connection works
        client.ping().await?;

        Ok(client)
    }

    /// Connect to an explicit daemon address.
    fn connect_to(host: &str, timeout: u64) -> Result<Docker> {
        debug!("Connecting to container runtime at {}", host);
        let docker = if host.starts_with("unix://") {
            Docker::connect_with_socket(host, timeout, bollard::API_DEFAULT_VERSION)
        } else if let Some(addr) = host.strip_prefix("tcp://") {
            Docker::connect_with_http(
                &format!("http://{}", addr),
                timeout,
                bollard::API_DEFAULT_VERSION,
            )
        } else if host.starts_with("http://") {
            Docker::connect_with_http(host, timeout, bollard::API_DEFAULT_VERSION)
        } else {
            return Err(ContainerError::ConfigError(format!(
                "Unsupported daemon address '{}' (expected unix://, tcp:// or http://)",
                host
            )));
        }?;
        info!("Connected to container runtime at {}", host);
        Ok(docker)
    }

    /// Connect to Docker or Podman daemon.
    ///
    /// Tries multiple connection strategies in order:
    /// 1. Local defaults (Unix socket or Windows named pipe, honouring DOCKER_HOST)
    /// 2. Rootless Podman socket
    /// 3. System Podman socket
    fn connect(timeout: u64) -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => {
                debug!("Local defaults failed: {}", e);
            }
        }

        #[cfg(unix)]
        {
            let mut sockets = Vec::new();
            if let Ok(home) = std::env::var("HOME") {
                sockets.push(format!("unix://{}/run/podman/podman.sock", home));
            }
            sockets.push("unix:///run/podman/podman.sock".to_string());

            for socket in sockets {
                debug!("Trying Podman socket: {}", socket);
                match Docker::connect_with_socket(&socket, timeout, bollard::API_DEFAULT_VERSION) {
                    Ok(docker) => {
                        info!("Connected to Podman via {}", socket);
                        return Ok(docker);
                    }
                    Err(e) => {
                        debug!("Podman socket {} failed: {}", socket, e);
                    }
                }
            }
        }

        Err(ContainerError::ConfigError(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.".to_string()
        ))
    }

    /// Get version information from the container runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the version query fails.
    pub async fn version(&self) -> Result<bollard::models::SystemVersion> {
        Ok(self.docker.version().await?)
    }

    /// Check if the runtime is Docker or Podman.
    ///
    /// # Errors
    ///
    /// Returns error if runtime detection fails.
    pub async fn runtime_type(&self) -> Result<RuntimeType> {
        let version = self.version().await?;

        let podman = version
            .components
            .unwrap_or_default()
            .iter()
            .any(|c| c.name.to_lowercase().contains("podman"));

        Ok(if podman {
            RuntimeType::Podman
        } else {
            RuntimeType::Docker
        })
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

/// Re-encode bollard's decoded log chunks into wire frames.
fn reframe<S>(output: S) -> ByteStream
where
    S: Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Send + 'static,
{
    output
        .filter_map(|item| async move {
            match item {
                Ok(LogOutput::StdErr { message }) => Some(Ok(encode_frame(Channel::Stderr, &message))),
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    Some(Ok(encode_frame(Channel::Stdout, &message)))
                }
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => Some(Err(io::Error::other(e))),
            }
        })
        .boxed()
}

fn credentials(auth: &RegistryAuth) -> Option<bollard::auth::DockerCredentials> {
    if auth.is_empty() {
        return None;
    }
    Some(bollard::auth::DockerCredentials {
        username: auth.username.clone(),
        password: auth.password.clone(),
        email: auth.email.clone(),
        serveraddress: auth.server.clone(),
        ..Default::default()
    })
}

fn error_detail(detail: Option<bollard::models::ErrorDetail>) -> Option<ErrorDetail> {
    detail.map(|d| ErrorDetail {
        code: d.code,
        message: d.message,
    })
}

/// Map a push message onto the progress model.
///
/// Push messages carry no layer id, so every message of one push shares the
/// `slot` line and redraws it in place.
fn push_event(info: PushImageInfo, slot: &str) -> ProgressEvent {
    ProgressEvent {
        id: Some(slot.to_string()),
        status: info.status.unwrap_or_default(),
        progress: info.progress,
        error: info.error,
        error_detail: error_detail(info.error_detail),
        stream: None,
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

#[async_trait]
impl Engine for ContainerClient {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    async fn list_resources(&self, all: bool) -> Result<Vec<ResourceRecord>> {
        let containers = self
            .docker
            .list_containers(Some(bollard::container::ListContainersOptions::<String> {
                all,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .map(|c| ResourceRecord {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                command: c.command.unwrap_or_default(),
                created: c.created.unwrap_or_default(),
                status: c.status.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_resource(&self, id: &str) -> Result<InspectRecord> {
        let inspect = self
            .docker
            .inspect_container(id, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .map_err(|e| ContainerError::from_api(e, id))?;

        let config = inspect.config.unwrap_or_default();
        let host = inspect.host_config.unwrap_or_default();
        let ports = inspect
            .network_settings
            .and_then(|n| n.ports)
            .unwrap_or_default()
            .into_iter()
            .map(|(port, bindings)| {
                let host_port = bindings
                    .and_then(|b| b.into_iter().next())
                    .and_then(|b| b.host_port);
                (port, host_port)
            })
            .collect();
        let mounts = inspect
            .mounts
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| Some((m.destination?, m.source?)))
            .collect();

        Ok(InspectRecord {
            id: inspect.id.unwrap_or_default(),
            name: inspect.name.unwrap_or_default(),
            image: inspect.image.unwrap_or_default(),
            config_image: config.image,
            entrypoint: config.entrypoint.unwrap_or_default(),
            cmd: config.cmd.unwrap_or_default(),
            env: config.env.unwrap_or_default(),
            created: inspect.created.map(|c| c.to_string()),
            network_mode: host.network_mode,
            dns: host.dns.unwrap_or_default(),
            ports,
            mounts,
            running: inspect.state.and_then(|s| s.running).unwrap_or(false),
        })
    }

    async fn create_resource(&self, id: &str, spec: &CreateSpec) -> Result<()> {
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .host
            .port_bindings
            .iter()
            .map(|(port, host_port)| {
                (
                    port.clone(),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host_port.clone()),
                    }]),
                )
            })
            .collect();

        let host_config = HostConfig {
            network_mode: Some(spec.host.network_mode.to_string()),
            binds: non_empty(spec.host.binds.clone()),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            dns: non_empty(spec.host.dns.clone()),
            ..Default::default()
        };

        let config = bollard::container::Config {
            image: Some(spec.image.clone()),
            cmd: non_empty(spec.cmd.clone()),
            env: non_empty(spec.env.clone()),
            exposed_ports: non_empty(spec.exposed_ports.clone()).map(|ports| {
                ports
                    .into_iter()
                    .map(|p| (p, HashMap::new()))
                    .collect::<HashMap<_, _>>()
            }),
            volumes: non_empty(spec.volumes.clone()).map(|volumes| {
                volumes
                    .into_iter()
                    .map(|v| (v, HashMap::new()))
                    .collect::<HashMap<_, _>>()
            }),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name: id,
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(|e| ContainerError::from_api(e, id))?;

        debug!("Created container {} from {}", id, spec.image);
        Ok(())
    }

    async fn start_resource(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<bollard::container::StartContainerOptions<String>>)
            .await
            .map_err(|e| ContainerError::from_api(e, id))
    }

    async fn stop_resource(&self, id: &str, wait: Duration) -> Result<()> {
        match self
            .docker
            .stop_container(
                id,
                Some(bollard::container::StopContainerOptions {
                    t: wait.as_secs() as i64,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // Already stopped
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(ContainerError::from_api(e, id)),
        }
    }

    async fn kill_resource(&self, id: &str) -> Result<()> {
        self.docker
            .kill_container(id, None::<bollard::container::KillContainerOptions<String>>)
            .await
            .map_err(|e| ContainerError::from_api(e, id))
    }

    async fn remove_resource(&self, id: &str) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(bollard::container::RemoveContainerOptions {
                    force: false,
                    v: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| ContainerError::from_api(e, id))
    }

    async fn attach_resource(&self, id: &str, options: &LogOptions) -> Result<ByteStream> {
        let results = self
            .docker
            .attach_container(
                id,
                Some(bollard::container::AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(options.all),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| ContainerError::from_api(e, id))?;

        Ok(reframe(results.output))
    }

    async fn resource_logs(&self, id: &str, options: &LogOptions) -> Result<ByteStream> {
        // Surface a missing container before handing out a stream.
        self.inspect_resource(id).await?;

        let output = self.docker.logs(
            id,
            Some(bollard::container::LogsOptions::<String> {
                follow: options.follow,
                stdout: true,
                stderr: true,
                tail: if options.all { "all" } else { "0" }.to_string(),
                ..Default::default()
            }),
        );
        Ok(reframe(output))
    }

    async fn events(&self) -> Result<EventStream> {
        let events = self
            .docker
            .events(None::<bollard::query_parameters::EventsOptions>)
            .filter_map(|item| async move {
                match item {
                    Ok(event) if event.typ == Some(EventMessageTypeEnum::CONTAINER) => {
                        let actor = event.actor.unwrap_or_default();
                        let mut attributes = actor.attributes.unwrap_or_default();
                        Some(Ok(RawEvent {
                            status: event.action.unwrap_or_default(),
                            id: actor.id.unwrap_or_default(),
                            from: attributes.remove("image"),
                            time: event.time.unwrap_or_default(),
                        }))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(ContainerError::Transport(e))),
                }
            })
            .boxed();
        Ok(events)
    }

    async fn pull_image(
        &self,
        family: &str,
        tag: &str,
        auth: &RegistryAuth,
    ) -> Result<MessageStream> {
        let stream = self
            .docker
            .create_image(
                Some(bollard::image::CreateImageOptions {
                    from_image: family.to_string(),
                    tag: tag.to_string(),
                    ..Default::default()
                }),
                None,
                credentials(auth),
            )
            .map(|item| {
                item.map(|info| ProgressEvent {
                    id: info.id,
                    status: info.status.unwrap_or_default(),
                    progress: info.progress,
                    error: info.error,
                    error_detail: error_detail(info.error_detail),
                    stream: None,
                })
                .map_err(ContainerError::Transport)
            })
            .boxed();
        Ok(stream)
    }

    async fn push_image(
        &self,
        family: &str,
        tag: &str,
        auth: &RegistryAuth,
    ) -> Result<MessageStream> {
        let slot = format!("{}:{}", family, tag);
        let stream = self
            .docker
            .push_image(
                family,
                Some(bollard::image::PushImageOptions {
                    tag: tag.to_string(),
                }),
                credentials(auth),
            )
            .map(move |item| {
                item.map(|info| push_event(info, &slot))
                    .map_err(ContainerError::Transport)
            })
            .boxed();
        Ok(stream)
    }

    async fn build_image(&self, tag: &str, context: Bytes, no_cache: bool) -> Result<MessageStream> {
        let docker = Arc::clone(&self.docker);
        let options = bollard::image::BuildImageOptions {
            t: tag.to_string(),
            nocache: no_cache,
            rm: true,
            ..Default::default()
        };
        let stream = async_stream::stream! {
            let mut inner = docker.build_image(options, None, Some(bollard::body_full(context)));
            while let Some(item) = inner.next().await {
                yield item;
            }
        }
            .map(|item| {
                item.map(|info| ProgressEvent {
                    id: info.id,
                    status: info.status.unwrap_or_default(),
                    progress: info.progress,
                    error: info.error,
                    error_detail: error_detail(info.error_detail),
                    stream: info.stream,
                })
                .map_err(ContainerError::Transport)
            })
            .boxed();
        Ok(stream)
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>> {
        let images = self
            .docker
            .list_images(Some(bollard::image::ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await?;

        Ok(images
            .into_iter()
            .map(|img| ImageRecord {
                id: img.id,
                parent_id: img.parent_id,
                repo_tags: img.repo_tags,
                created: img.created,
                size: img.size,
            })
            .collect())
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        self.docker
            .remove_image(
                reference,
                Some(bollard::image::RemoveImageOptions {
                    force: false,
                    ..Default::default()
                }),
                None,
            )
            .await
            .map_err(|e| ContainerError::from_api(e, reference))?;
        Ok(())
    }
}

/// Type of container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "Docker"),
            RuntimeType::Podman => write!(f, "Podman"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ProgressView, demux};
    use futures::stream;

    #[tokio::test]
    async fn test_reframed_output_demuxes_back() {
        let output = stream::iter(vec![
            Ok(LogOutput::StdOut {
                message: Bytes::from_static(b"out\n"),
            }),
            Ok(LogOutput::StdIn {
                message: Bytes::from_static(b"typed"),
            }),
            Ok(LogOutput::StdErr {
                message: Bytes::from_static(b"err\n"),
            }),
            Ok(LogOutput::Console {
                message: Bytes::from_static(b"tty\n"),
            }),
        ]);

        let demuxed = demux(reframe(output));
        let (stdout, stderr) =
            tokio::join!(demuxed.stdout.read_to_end(), demuxed.stderr.read_to_end());
        assert_eq!(stdout.unwrap(), b"out\ntty\n".to_vec());
        assert_eq!(stderr.unwrap(), b"err\n".to_vec());
    }

    #[test]
    fn test_credentials_only_when_configured() {
        assert!(credentials(&RegistryAuth::default()).is_none());
        let creds = credentials(&RegistryAuth {
            username: Some("me".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(creds.username.as_deref(), Some("me"));
    }

    #[test]
    fn test_push_messages_redraw_one_line() {
        let mut view = ProgressView::new();
        for step in 0..50 {
            let info = PushImageInfo {
                status: Some("Pushing".to_string()),
                progress: Some(format!("[{}>]", "=".repeat(step % 10))),
                ..Default::default()
            };
            view.apply(&push_event(info, "registry.local:5000/app:1.0"))
                .unwrap();
        }
        assert_eq!(view.len(), 1);
        assert!(view.render().starts_with("registry.local:5000/app:1.0 Pushing [=========>]"));
    }

    #[test]
    fn test_push_error_detail_aborts() {
        let info = PushImageInfo {
            error_detail: Some(bollard::models::ErrorDetail {
                message: Some("denied: requested access to the resource is denied".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = ProgressView::new()
            .apply(&push_event(info, "app:latest"))
            .unwrap_err();
        assert!(matches!(err, ContainerError::Protocol(msg) if msg.starts_with("denied")));
    }

    #[tokio::test]
    #[ignore] // Requires Docker/Podman to be running
    async fn test_client_connection() {
        let client = ContainerClient::new().await.unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_runtime_detection() {
        let client = ContainerClient::new().await.unwrap();
        let runtime_type = client.runtime_type().await.unwrap();
        println!("Runtime type: {}", runtime_type);
    }
}
