//! Container lifecycle orchestration.
//!
//! A container is in one of three states: absent, stopped or running. A
//! controlled stop always removes the container, so a stopped container means
//! it died on its own; `start` recycles it once and then gives up. State is
//! read from the daemon before every decision and never cached.

use crate::container::client::{ContainerClient, ContainerClientConfig};
use crate::container::config::{LogOptions, StartOptions, StopOptions};
use crate::container::engine::{CreateSpec, Engine, InspectRecord, ResourceRecord};
use crate::container::events::{EventResolver, LifecycleEvent, NameCache};
use crate::container::image::{ImageManager, is_dangling};
use crate::container::naming::{
    decode_container, decode_image, display_image, encode_container, short_id,
};
use crate::container::{ContainerError, Result};
use crate::env::lifecycle::{DEFAULT_STOP_TIMEOUT, MAX_START_RETRIES};
use crate::stream::{Demuxed, demux};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Container orchestrator configuration.
#[derive(Debug, Clone)]
pub struct ContainerOrchestratorConfig {
    /// Graceful stop window used when [`StopOptions::wait`] is unset
    pub stop_timeout: Duration,
}

impl Default for ContainerOrchestratorConfig {
    fn default() -> Self {
        Self {
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Absent,
    Stopped,
    Running,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceState::Absent => write!(f, "absent"),
            ResourceState::Stopped => write!(f, "stopped"),
            ResourceState::Running => write!(f, "running"),
        }
    }
}

/// Inspected view of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDetail {
    /// Human name
    pub name: String,
    /// Daemon-side identifier derived from the name
    pub encoded_id: String,
    /// Short daemon id
    pub id: String,
    /// Image reference in daemon form
    pub image: String,
    pub state: ResourceState,
    /// Entrypoint and command joined by spaces
    pub command: String,
    pub created: Option<DateTime<Utc>>,
    pub network: Option<String>,
    pub dns: Vec<String>,
    /// Container port to host port, bridge networking only
    pub ports: BTreeMap<String, String>,
    /// Container path to host path
    pub volumes: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

impl ResourceDetail {
    fn from_record(name: &str, encoded_id: &str, record: InspectRecord) -> Self {
        let bridged = record.network_mode.as_deref() == Some("bridge");
        let ports = if bridged {
            record
                .ports
                .into_iter()
                .filter_map(|(port, host)| {
                    let port = port.strip_suffix("/tcp").map(str::to_string).unwrap_or(port);
                    Some((port, host?))
                })
                .collect()
        } else {
            BTreeMap::new()
        };

        let env = record
            .env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        let command = record
            .entrypoint
            .iter()
            .chain(record.cmd.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            name: name.to_string(),
            encoded_id: encoded_id.to_string(),
            id: short_id(&record.id).to_string(),
            image: record.config_image.unwrap_or(record.image),
            state: if record.running {
                ResourceState::Running
            } else {
                ResourceState::Stopped
            },
            command,
            created: record
                .created
                .as_deref()
                .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
                .map(|c| c.with_timezone(&Utc)),
            network: record.network_mode,
            dns: record.dns,
            ports,
            volumes: record.mounts,
            env,
        }
    }
}

/// One row of the container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSummary {
    /// Short daemon id
    pub id: String,
    /// Human name
    pub name: String,
    /// Image in display form
    pub image: String,
    pub command: String,
    pub created: Option<DateTime<Utc>>,
    pub status: String,
}

impl ResourceSummary {
    fn from_record(record: ResourceRecord) -> Option<Self> {
        let name = record.names.first()?;
        Some(Self {
            id: short_id(&record.id).to_string(),
            name: decode_container(name.trim_start_matches('/')),
            image: display_image(&record.image),
            command: record.command,
            created: DateTime::from_timestamp(record.created, 0),
            status: record.status,
        })
    }
}

/// Outcome of [`ContainerOrchestrator::clean`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub images_removed: usize,
    pub containers_removed: usize,
}

/// High-level container orchestrator.
///
/// Generic over the [`Engine`] so the state machine can be driven against an
/// in-memory daemon in tests.
pub struct ContainerOrchestrator<E: Engine = ContainerClient> {
    engine: Arc<E>,
    config: ContainerOrchestratorConfig,
}

impl ContainerOrchestrator<ContainerClient> {
    /// Connect to the local daemon with default configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to container runtime fails.
    pub async fn new() -> Result<Self> {
        Self::with_config(
            ContainerClientConfig::default(),
            ContainerOrchestratorConfig::default(),
        )
        .await
    }

    /// Connect with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to container runtime fails.
    pub async fn with_config(
        client_config: ContainerClientConfig,
        config: ContainerOrchestratorConfig,
    ) -> Result<Self> {
        let client = ContainerClient::with_config(client_config).await?;
        Ok(Self::with_engine(Arc::new(client), config))
    }
}

impl<E: Engine> ContainerOrchestrator<E> {
    /// Create an orchestrator over an existing engine.
    pub fn with_engine(engine: Arc<E>, config: ContainerOrchestratorConfig) -> Self {
        Self { engine, config }
    }

    /// The engine every call goes through.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Image operations over the same engine.
    pub fn images(&self) -> ImageManager<E> {
        ImageManager::new(Arc::clone(&self.engine))
    }

    /// Check the daemon is reachable.
    ///
    /// # Errors
    ///
    /// Returns the transport error if it is not.
    pub async fn ping(&self) -> Result<()> {
        self.engine.ping().await
    }

    /// Inspect by daemon id; `None` when absent.
    async fn probe(&self, id: &str) -> Result<Option<InspectRecord>> {
        match self.engine.inspect_resource(id).await {
            Ok(record) => Ok(Some(record)),
            Err(ContainerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Current state of a container.
    ///
    /// # Errors
    ///
    /// Returns any inspect error other than not found.
    pub async fn state(&self, name: &str) -> Result<ResourceState> {
        Ok(match self.probe(&encode_container(name)).await? {
            None => ResourceState::Absent,
            Some(record) if record.running => ResourceState::Running,
            Some(_) => ResourceState::Stopped,
        })
    }

    /// Start a container, creating it if needed.
    ///
    /// A stopped container is killed, removed and recreated, at most
    /// [`MAX_START_RETRIES`] times.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::Conflict`] if it is already running and `force` is unset
    /// - [`ContainerError::RecoveryExhausted`] if a stale container survives removal
    /// - any daemon error from inspect, create or start
    pub async fn start(&self, name: &str, options: &StartOptions) -> Result<()> {
        let image = decode_image(options.image.as_deref().unwrap_or(name));
        self.start_image(name, options, image).await
    }

    /// [`Self::start`] with `image` already in daemon form.
    async fn start_image(&self, name: &str, options: &StartOptions, image: String) -> Result<()> {
        let id = encode_container(name);
        let mut retries_left = MAX_START_RETRIES;

        loop {
            match self.probe(&id).await? {
                None => {
                    return self.create_and_start(&id, options.create_spec(image)).await;
                }
                Some(record) if record.running => {
                    if options.force {
                        debug!("Container {} already running", name);
                        return Ok(());
                    }
                    return Err(ContainerError::Conflict(format!(
                        "{} is already running",
                        name
                    )));
                }
                Some(_) if retries_left == 0 => {
                    return Err(ContainerError::RecoveryExhausted(name.to_string()));
                }
                Some(_) => {
                    retries_left -= 1;
                    warn!("Container {} exited on its own, recreating it", name);
                    if let Err(e) = self.engine.kill_resource(&id).await {
                        debug!("Kill of stale container {} failed: {}", name, e);
                    }
                    if let Err(e) = self.engine.remove_resource(&id).await {
                        debug!("Removal of stale container {} failed: {}", name, e);
                    }
                }
            }
        }
    }

    async fn create_and_start(&self, id: &str, spec: CreateSpec) -> Result<()> {
        info!("Creating container {} from {}", id, spec.image);
        self.engine.create_resource(id, &spec).await?;

        if let Err(e) = self.engine.start_resource(id).await {
            warn!("Start of {} failed, removing it: {}", id, e);
            if let Err(cleanup) = self.engine.remove_resource(id).await {
                debug!("Removal after failed start of {} failed: {}", id, cleanup);
            }
            return Err(e);
        }

        info!("Started container {}", id);
        Ok(())
    }

    /// Stop and remove a container.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if it does not exist and `force`
    /// is unset, or any daemon error from stop or remove.
    pub async fn stop(&self, name: &str, options: &StopOptions) -> Result<()> {
        let id = encode_container(name);

        if self.probe(&id).await?.is_none() {
            if options.force {
                debug!("Container {} already absent", name);
                return Ok(());
            }
            return Err(ContainerError::NotFound(name.to_string()));
        }

        let wait = options.wait_or(self.config.stop_timeout);
        info!("Stopping container {} (wait {:?})", name, wait);
        self.engine.stop_resource(&id, wait).await?;
        self.engine.remove_resource(&id).await?;
        info!("Removed container {}", name);
        Ok(())
    }

    /// Stop then start a container, keeping its image unless one is given.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Self::stop`] or [`Self::start`].
    pub async fn restart(&self, name: &str, options: &StartOptions) -> Result<()> {
        // Already in daemon form; decoding again would mangle `@sha256:` digests.
        let current = match options.image {
            Some(_) => None,
            None => self
                .probe(&encode_container(name))
                .await?
                .and_then(|record| record.config_image)
                .filter(|image| !image.is_empty()),
        };

        self.stop(
            name,
            &StopOptions {
                force: true,
                wait: None,
            },
        )
        .await?;
        match current {
            Some(image) => self.start_image(name, options, image).await,
            None => self.start(name, options).await,
        }
    }

    /// Remove dangling images and every container that is not running.
    ///
    /// Every removal is attempted; the first failure is returned afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first listing or removal error.
    pub async fn clean(&self) -> Result<CleanReport> {
        let mut report = CleanReport::default();
        let mut first_error: Option<ContainerError> = None;

        let images = self.engine.list_images().await?;
        for image in images.iter().filter(|i| is_dangling(i)) {
            match self.engine.remove_image(&image.id).await {
                Ok(()) => report.images_removed += 1,
                Err(e) => {
                    warn!("Could not remove image {}: {}", short_id(&image.id), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        let containers = self.engine.list_resources(true).await?;
        for container in containers {
            let result = match self.probe(&container.id).await {
                Ok(Some(record)) if record.running => continue,
                Ok(Some(_)) => self.engine.remove_resource(&container.id).await,
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => report.containers_removed += 1,
                Err(e) => {
                    warn!("Could not remove container {}: {}", short_id(&container.id), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(
            "Removed {} images and {} containers",
            report.images_removed, report.containers_removed
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Inspect a container.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if it does not exist.
    pub async fn inspect(&self, name: &str) -> Result<ResourceDetail> {
        let id = encode_container(name);
        let record = self
            .probe(&id)
            .await?
            .ok_or_else(|| ContainerError::NotFound(name.to_string()))?;
        Ok(ResourceDetail::from_record(name, &id, record))
    }

    /// List running containers, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns error if the daemon call fails.
    pub async fn list(&self) -> Result<Vec<ResourceSummary>> {
        let mut summaries: Vec<ResourceSummary> = self
            .engine
            .list_resources(false)
            .await?
            .into_iter()
            .filter_map(ResourceSummary::from_record)
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// Attach to a container's output, split into stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if it does not exist.
    pub async fn attach(&self, name: &str, options: &LogOptions) -> Result<Demuxed> {
        let id = encode_container(name);
        let upstream = self.engine.attach_resource(&id, options).await?;
        Ok(demux(upstream))
    }

    /// Read a container's log, split into stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if it does not exist.
    pub async fn logs(&self, name: &str, options: &LogOptions) -> Result<Demuxed> {
        let id = encode_container(name);
        let upstream = self.engine.resource_logs(&id, options).await?;
        Ok(demux(upstream))
    }

    /// Subscribe to lifecycle events, resolving names through `cache` when given.
    ///
    /// # Errors
    ///
    /// Returns error if the subscription fails.
    pub async fn events(
        &self,
        cache: Option<NameCache>,
    ) -> Result<BoxStream<'static, Result<LifecycleEvent>>> {
        let feed = self.engine.events().await?;
        let resolver = match cache {
            Some(cache) => EventResolver::new(Arc::clone(&self.engine), cache),
            None => EventResolver::without_names(Arc::clone(&self.engine)),
        };
        Ok(resolver.resolve_stream(feed))
    }
}
