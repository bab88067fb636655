//! In-memory [`Engine`] for tests and dry runs.
//!
//! Keeps containers and images in a map, records every call, and follows the
//! daemon's conflict rules closely enough to drive the orchestrator through
//! all of its states. Failure modes (a start that errors, a remove that
//! silently does nothing) can be switched on to exercise recovery paths.

use crate::container::config::LogOptions;
use crate::container::engine::{
    ByteStream, CreateSpec, Engine, EventStream, ImageRecord, InspectRecord, MessageStream,
    RawEvent, ResourceRecord,
};
use crate::container::image::RegistryAuth;
use crate::container::{ContainerError, Result};
use crate::stream::ProgressEvent;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A call made against [`MemoryEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Ping,
    ListResources,
    Inspect(String),
    Create(String),
    Start(String),
    Stop(String, Duration),
    Kill(String),
    Remove(String),
    Attach(String),
    Logs(String),
    Events,
    Pull(String, String),
    Push(String, String),
    Build(String),
    ListImages,
    RemoveImage(String),
}

impl EngineCall {
    /// Whether the call changes container state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            EngineCall::Create(_)
                | EngineCall::Start(_)
                | EngineCall::Stop(..)
                | EngineCall::Kill(_)
                | EngineCall::Remove(_)
        )
    }
}

#[derive(Debug, Clone)]
struct MemoryContainer {
    name: String,
    image: String,
    running: bool,
    spec: Option<CreateSpec>,
}

#[derive(Debug, Default)]
struct MemoryState {
    containers: BTreeMap<String, MemoryContainer>,
    images: Vec<ImageRecord>,
    calls: Vec<EngineCall>,
    log_frames: Vec<Bytes>,
    events: Vec<RawEvent>,
    progress: Vec<ProgressEvent>,
    sticky_removals: bool,
    fail_start: bool,
    last_auth: Option<RegistryAuth>,
    last_build: Option<(Bytes, bool)>,
}

impl MemoryState {
    fn find(&self, id: &str) -> Option<String> {
        if self.containers.contains_key(id) {
            return Some(id.to_string());
        }
        self.containers
            .iter()
            .find(|(_, c)| c.name == id)
            .map(|(key, _)| key.clone())
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut MemoryContainer> {
        let key = self
            .find(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        self.containers
            .get_mut(&key)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }
}

/// Recording in-memory container daemon.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<MemoryState>,
}

fn server_error(message: &str) -> ContainerError {
    ContainerError::Transport(bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message: message.to_string(),
    })
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: EngineCall) -> MutexGuard<'_, MemoryState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    /// Add a container whose daemon name equals its id.
    pub fn add_container(&self, id: &str, image: &str, running: bool) {
        self.add_named_container(id, id, image, running);
    }

    /// Add a container with a separate daemon name.
    pub fn add_named_container(&self, id: &str, name: &str, image: &str, running: bool) {
        self.state().containers.insert(
            id.to_string(),
            MemoryContainer {
                name: name.to_string(),
                image: image.to_string(),
                running,
                spec: None,
            },
        );
    }

    /// Remove a container behind the caller's back.
    pub fn forget(&self, id: &str) {
        let mut state = self.state();
        if let Some(key) = state.find(id) {
            state.containers.remove(&key);
        }
    }

    /// Flip a container's running flag behind the caller's back.
    pub fn set_running(&self, id: &str, running: bool) {
        if let Ok(container) = self.state().container_mut(id) {
            container.running = running;
        }
    }

    /// Running flag of a container, `None` when it does not exist.
    pub fn is_running(&self, id: &str) -> Option<bool> {
        let state = self.state();
        state
            .find(id)
            .and_then(|key| state.containers.get(&key).map(|c| c.running))
    }

    /// Image a container was created from.
    pub fn image_of(&self, id: &str) -> Option<String> {
        let state = self.state();
        state
            .find(id)
            .and_then(|key| state.containers.get(&key).map(|c| c.image.clone()))
    }

    /// Create spec a container was created with.
    pub fn created_spec(&self, id: &str) -> Option<CreateSpec> {
        let state = self.state();
        state
            .find(id)
            .and_then(|key| state.containers.get(&key).and_then(|c| c.spec.clone()))
    }

    pub fn add_image(&self, record: ImageRecord) {
        self.state().images.push(record);
    }

    pub fn image_ids(&self) -> Vec<String> {
        self.state().images.iter().map(|i| i.id.clone()).collect()
    }

    /// Frames served by attach and logs, in wire form.
    pub fn set_log_frames(&self, frames: Vec<Bytes>) {
        self.state().log_frames = frames;
    }

    pub fn set_events(&self, events: Vec<RawEvent>) {
        self.state().events = events;
    }

    /// Messages served by pull, push and build.
    pub fn set_progress(&self, progress: Vec<ProgressEvent>) {
        self.state().progress = progress;
    }

    /// Make removals succeed without removing anything.
    pub fn set_sticky_removals(&self, sticky: bool) {
        self.state().sticky_removals = sticky;
    }

    /// Make every start fail with a server error.
    pub fn set_fail_start(&self, fail: bool) {
        self.state().fail_start = fail;
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    /// State-changing calls made so far.
    pub fn mutations(&self) -> Vec<EngineCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// How often `id` was inspected.
    pub fn inspect_count(&self, id: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, EngineCall::Inspect(i) if i == id))
            .count()
    }

    /// Credentials passed to the last pull or push.
    pub fn last_auth(&self) -> Option<RegistryAuth> {
        self.state().last_auth.clone()
    }

    /// Context and `no_cache` flag passed to the last build.
    pub fn last_build(&self) -> Option<(Bytes, bool)> {
        self.state().last_build.clone()
    }

    fn frames(&self, id: &str, call: EngineCall) -> Result<ByteStream> {
        let mut state = self.record(call);
        state.container_mut(id)?;
        let frames = state.log_frames.clone();
        Ok(stream::iter(frames.into_iter().map(Ok)).boxed())
    }

    fn messages(&self) -> MessageStream {
        let progress = self.state().progress.clone();
        stream::iter(progress.into_iter().map(Ok)).boxed()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn ping(&self) -> Result<()> {
        self.record(EngineCall::Ping);
        Ok(())
    }

    async fn list_resources(&self, all: bool) -> Result<Vec<ResourceRecord>> {
        let state = self.record(EngineCall::ListResources);
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| all || c.running)
            .map(|(id, c)| ResourceRecord {
                id: id.clone(),
                names: vec![format!("/{}", c.name)],
                image: c.image.clone(),
                command: c
                    .spec
                    .as_ref()
                    .map(|s| s.cmd.join(" "))
                    .unwrap_or_default(),
                created: 0,
                status: if c.running { "Up" } else { "Exited (0)" }.to_string(),
            })
            .collect())
    }

    async fn inspect_resource(&self, id: &str) -> Result<InspectRecord> {
        let mut state = self.record(EngineCall::Inspect(id.to_string()));
        let key = state
            .find(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        let container = state.container_mut(&key)?.clone();
        let spec = container.spec.unwrap_or_default();

        Ok(InspectRecord {
            id: key,
            name: format!("/{}", container.name),
            image: format!("sha256:{}", container.image),
            config_image: Some(container.image),
            entrypoint: Vec::new(),
            cmd: spec.cmd,
            env: spec.env,
            created: Some("2024-05-01T12:00:00Z".to_string()),
            network_mode: Some(spec.host.network_mode.to_string()),
            dns: spec.host.dns,
            ports: spec
                .host
                .port_bindings
                .into_iter()
                .map(|(port, host)| (port, Some(host)))
                .collect(),
            mounts: spec
                .host
                .binds
                .iter()
                .filter_map(|bind| {
                    let mut parts = bind.split(':');
                    let from = parts.next()?;
                    let to = parts.next()?;
                    Some((to.to_string(), from.to_string()))
                })
                .collect(),
            running: container.running,
        })
    }

    async fn create_resource(&self, id: &str, spec: &CreateSpec) -> Result<()> {
        let mut state = self.record(EngineCall::Create(id.to_string()));
        if state.find(id).is_some() {
            return Err(ContainerError::Conflict(format!("{}: name in use", id)));
        }
        state.containers.insert(
            id.to_string(),
            MemoryContainer {
                name: id.to_string(),
                image: spec.image.clone(),
                running: false,
                spec: Some(spec.clone()),
            },
        );
        Ok(())
    }

    async fn start_resource(&self, id: &str) -> Result<()> {
        let mut state = self.record(EngineCall::Start(id.to_string()));
        let fail = state.fail_start;
        let container = state.container_mut(id)?;
        if fail {
            return Err(server_error("cannot start container"));
        }
        container.running = true;
        Ok(())
    }

    async fn stop_resource(&self, id: &str, wait: Duration) -> Result<()> {
        let mut state = self.record(EngineCall::Stop(id.to_string(), wait));
        state.container_mut(id)?.running = false;
        Ok(())
    }

    async fn kill_resource(&self, id: &str) -> Result<()> {
        let mut state = self.record(EngineCall::Kill(id.to_string()));
        let container = state.container_mut(id)?;
        if !container.running {
            return Err(ContainerError::Conflict(format!("{}: is not running", id)));
        }
        container.running = false;
        Ok(())
    }

    async fn remove_resource(&self, id: &str) -> Result<()> {
        let mut state = self.record(EngineCall::Remove(id.to_string()));
        let sticky = state.sticky_removals;
        let key = state
            .find(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if state.container_mut(&key)?.running {
            return Err(ContainerError::Conflict(format!(
                "{}: cannot remove a running container",
                id
            )));
        }
        if !sticky {
            state.containers.remove(&key);
        }
        Ok(())
    }

    async fn attach_resource(&self, id: &str, _options: &LogOptions) -> Result<ByteStream> {
        self.frames(id, EngineCall::Attach(id.to_string()))
    }

    async fn resource_logs(&self, id: &str, _options: &LogOptions) -> Result<ByteStream> {
        self.frames(id, EngineCall::Logs(id.to_string()))
    }

    async fn events(&self) -> Result<EventStream> {
        let events = self.record(EngineCall::Events).events.clone();
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }

    async fn pull_image(
        &self,
        family: &str,
        tag: &str,
        auth: &RegistryAuth,
    ) -> Result<MessageStream> {
        let mut state = self.record(EngineCall::Pull(family.to_string(), tag.to_string()));
        state.last_auth = Some(auth.clone());
        drop(state);
        Ok(self.messages())
    }

    async fn push_image(
        &self,
        family: &str,
        tag: &str,
        auth: &RegistryAuth,
    ) -> Result<MessageStream> {
        let mut state = self.record(EngineCall::Push(family.to_string(), tag.to_string()));
        state.last_auth = Some(auth.clone());
        drop(state);
        Ok(self.messages())
    }

    async fn build_image(&self, tag: &str, context: Bytes, no_cache: bool) -> Result<MessageStream> {
        let mut state = self.record(EngineCall::Build(tag.to_string()));
        state.last_build = Some((context, no_cache));
        drop(state);
        Ok(self.messages())
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.record(EngineCall::ListImages).images.clone())
    }

    async fn remove_image(&self, reference: &str) -> Result<()> {
        let mut state = self.record(EngineCall::RemoveImage(reference.to_string()));
        let before = state.images.len();
        state
            .images
            .retain(|i| i.id != reference && !i.repo_tags.iter().any(|t| t == reference));
        if state.images.len() == before {
            return Err(ContainerError::NotFound(reference.to_string()));
        }
        Ok(())
    }
}
