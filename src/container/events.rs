//! Lifecycle event feed with id-to-name resolution.

use crate::container::engine::{Engine, EventStream, RawEvent};
use crate::container::naming::{decode_container, display_image, short_id};
use crate::container::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// Status the daemon reports when a container is deleted.
const DESTROY_STATUS: &str = "destroy";

/// Session-owned cache of container id to human name.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct NameCache {
    names: Arc<DashMap<String, String>>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.names.get(id).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, id: String, name: String) {
        self.names.insert(id, name);
    }

    /// Drop the entry for `id`, returning the evicted name.
    pub fn invalidate(&self, id: &str) -> Option<String> {
        self.names.remove(id).map(|(_, name)| name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A resolved lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub status: String,
    /// Short container id
    pub id: String,
    /// Human name, when resolution is enabled and the container still exists
    pub name: Option<String>,
    /// Image in display form
    pub image: Option<String>,
    pub time: DateTime<Utc>,
}

/// Fills in human names on raw daemon events.
pub struct EventResolver<E: Engine> {
    engine: Arc<E>,
    cache: NameCache,
    resolve_names: bool,
}

impl<E: Engine> EventResolver<E> {
    /// Resolve names through `cache`.
    pub fn new(engine: Arc<E>, cache: NameCache) -> Self {
        Self {
            engine,
            cache,
            resolve_names: true,
        }
    }

    /// Pass events through without looking up names.
    pub fn without_names(engine: Arc<E>) -> Self {
        Self {
            engine,
            cache: NameCache::new(),
            resolve_names: false,
        }
    }

    /// The cache this resolver reads and writes.
    pub fn cache(&self) -> &NameCache {
        &self.cache
    }

    async fn lookup(&self, id: &str) -> Option<String> {
        if let Some(name) = self.cache.get(id) {
            return Some(name);
        }

        match self.engine.inspect_resource(id).await {
            Ok(record) => {
                let name = decode_container(record.name.trim_start_matches('/'));
                self.cache.insert(id.to_string(), name.clone());
                Some(name)
            }
            Err(e) => {
                // Usually the container is already gone.
                debug!("Could not resolve name for {}: {}", short_id(id), e);
                None
            }
        }
    }

    /// Resolve one event.
    pub async fn resolve(&self, raw: RawEvent) -> LifecycleEvent {
        let name = if self.resolve_names {
            self.lookup(&raw.id).await
        } else {
            None
        };

        if raw.status == DESTROY_STATUS {
            self.cache.invalidate(&raw.id);
        }

        LifecycleEvent {
            status: raw.status,
            id: short_id(&raw.id).to_string(),
            name,
            image: raw.from.as_deref().map(display_image),
            time: DateTime::from_timestamp(raw.time, 0).unwrap_or_default(),
        }
    }

    /// Resolve a feed, one event at a time in feed order.
    pub fn resolve_stream(self, events: EventStream) -> BoxStream<'static, Result<LifecycleEvent>> {
        let resolver = Arc::new(self);
        events
            .then(move |item| {
                let resolver = Arc::clone(&resolver);
                async move {
                    match item {
                        Ok(raw) => Ok(resolver.resolve(raw).await),
                        Err(e) => Err(e),
                    }
                }
            })
            .boxed()
    }
}
