//! The daemon seam.
//!
//! Every daemon call made by the orchestrator, the image manager and the event
//! resolver goes through [`Engine`]. [`ContainerClient`](super::ContainerClient)
//! implements it over bollard; [`MemoryEngine`](super::testing::MemoryEngine)
//! implements it in memory for tests.

use crate::container::Result;
use crate::container::config::{LogOptions, NetworkMode};
use crate::container::image::RegistryAuth;
use crate::stream::ProgressEvent;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

/// Multiplexed attach/log byte stream, in wire framing.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Raw lifecycle event feed.
pub type EventStream = BoxStream<'static, Result<RawEvent>>;

/// Pull, push or build message stream.
pub type MessageStream = BoxStream<'static, Result<ProgressEvent>>;

/// Container as reported by a list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRecord {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub command: String,
    /// Unix timestamp
    pub created: i64,
    pub status: String,
}

/// Container as reported by an inspect call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectRecord {
    pub id: String,
    /// Daemon name, usually with a leading `/`
    pub name: String,
    /// Image id the container was created from
    pub image: String,
    /// Image reference from the container config
    pub config_image: Option<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// RFC 3339 creation time
    pub created: Option<String>,
    pub network_mode: Option<String>,
    pub dns: Vec<String>,
    /// Container port (`8080/tcp`) to first bound host port
    pub ports: BTreeMap<String, Option<String>>,
    /// Container path to host path
    pub mounts: BTreeMap<String, String>,
    pub running: bool,
}

/// Image as reported by a list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    pub parent_id: String,
    pub repo_tags: Vec<String>,
    /// Unix timestamp
    pub created: i64,
    pub size: i64,
}

/// One message from the daemon's event feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Action, e.g. `start` or `destroy`
    pub status: String,
    pub id: String,
    /// Image the container runs
    pub from: Option<String>,
    /// Unix timestamp
    pub time: i64,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateSpec {
    pub image: String,
    pub cmd: Vec<String>,
    /// `KEY=VALUE` entries
    pub env: Vec<String>,
    /// `port/proto` entries
    pub exposed_ports: Vec<String>,
    /// Container paths declared as volumes
    pub volumes: Vec<String>,
    pub host: HostSpec,
}

/// Host-side settings applied at create time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSpec {
    pub network_mode: NetworkMode,
    /// `host:container:rw` entries
    pub binds: Vec<String>,
    /// `port/proto` to host port
    pub port_bindings: BTreeMap<String, String>,
    pub dns: Vec<String>,
}

/// Container daemon operations.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Check the daemon is reachable.
    async fn ping(&self) -> Result<()>;

    /// List containers, including stopped ones when `all` is set.
    async fn list_resources(&self, all: bool) -> Result<Vec<ResourceRecord>>;

    /// Inspect a container by id or name.
    ///
    /// Fails with `NotFound` when it does not exist.
    async fn inspect_resource(&self, id: &str) -> Result<InspectRecord>;

    async fn create_resource(&self, id: &str, spec: &CreateSpec) -> Result<()>;

    async fn start_resource(&self, id: &str) -> Result<()>;

    /// Stop gracefully, killing after `wait`.
    async fn stop_resource(&self, id: &str, wait: Duration) -> Result<()>;

    async fn kill_resource(&self, id: &str) -> Result<()>;

    async fn remove_resource(&self, id: &str) -> Result<()>;

    /// Attach to a container's output.
    async fn attach_resource(&self, id: &str, options: &LogOptions) -> Result<ByteStream>;

    /// Read a container's log.
    async fn resource_logs(&self, id: &str, options: &LogOptions) -> Result<ByteStream>;

    /// Subscribe to lifecycle events.
    async fn events(&self) -> Result<EventStream>;

    async fn pull_image(&self, family: &str, tag: &str, auth: &RegistryAuth)
    -> Result<MessageStream>;

    async fn push_image(&self, family: &str, tag: &str, auth: &RegistryAuth)
    -> Result<MessageStream>;

    /// Build an image from a tar context.
    async fn build_image(&self, tag: &str, context: Bytes, no_cache: bool)
    -> Result<MessageStream>;

    async fn list_images(&self) -> Result<Vec<ImageRecord>>;

    async fn remove_image(&self, reference: &str) -> Result<()>;
}
