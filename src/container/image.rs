//! Image pull, push, build and housekeeping.
//!
//! Pull and push responses are folded into a redrawable progress view; build
//! responses are passed through as the build's text output.

use crate::container::engine::{Engine, ImageRecord};
use crate::container::naming::{ImageReference, display_image};
use crate::container::{ContainerError, Result};
use crate::env::naming::UNTAGGED_IMAGE;
use crate::stream::{render_build, render_progress};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry credentials.
///
/// Every field is optional; unset fields fall back to configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Registry address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl RegistryAuth {
    /// Fill unset fields from `defaults`.
    pub fn or(&self, defaults: &RegistryAuth) -> RegistryAuth {
        RegistryAuth {
            username: self.username.clone().or_else(|| defaults.username.clone()),
            password: self.password.clone().or_else(|| defaults.password.clone()),
            email: self.email.clone().or_else(|| defaults.email.clone()),
            server: self.server.clone().or_else(|| defaults.server.clone()),
        }
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.email.is_none()
            && self.server.is_none()
    }
}

/// Options for building an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Ignore the daemon's layer cache
    pub no_cache: bool,
}

/// One row of the image listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: String,
    pub parent: String,
    pub created: Option<DateTime<Utc>>,
    /// Tag in display form, default tag elided
    pub name: String,
    pub size: i64,
}

impl ImageSummary {
    /// One row per repo tag, untagged images skipped, sorted by name.
    pub fn from_records(records: Vec<ImageRecord>) -> Vec<ImageSummary> {
        let mut summaries: Vec<ImageSummary> = records
            .into_iter()
            .filter(|record| !record.repo_tags.iter().any(|tag| tag == UNTAGGED_IMAGE))
            .flat_map(|record| {
                let created = DateTime::from_timestamp(record.created, 0);
                record
                    .repo_tags
                    .iter()
                    .map(|tag| ImageSummary {
                        id: record.id.clone(),
                        parent: record.parent_id.clone(),
                        created,
                        name: display_image(tag),
                        size: record.size,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }
}

/// Whether an image carries no tag.
pub(crate) fn is_dangling(record: &ImageRecord) -> bool {
    record
        .repo_tags
        .first()
        .is_none_or(|tag| tag == UNTAGGED_IMAGE)
}

/// Image operations over an [`Engine`].
pub struct ImageManager<E: Engine> {
    engine: Arc<E>,
    default_auth: RegistryAuth,
}

impl<E: Engine> ImageManager<E> {
    /// Create an image manager.
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            default_auth: RegistryAuth::default(),
        }
    }

    /// Use `auth` for every field a call leaves unset.
    pub fn with_default_auth(mut self, auth: RegistryAuth) -> Self {
        self.default_auth = auth;
        self
    }

    /// Pull an image, yielding the rendered progress view after every update.
    ///
    /// # Errors
    ///
    /// Fails fast on a malformed reference; daemon-reported errors end the
    /// stream with [`ContainerError::Protocol`].
    pub async fn pull(
        &self,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let reference = ImageReference::parse(reference)?;
        info!("Pulling image: {}", reference);
        let events = self
            .engine
            .pull_image(
                &reference.family(),
                reference.tag_or_default(),
                &auth.or(&self.default_auth),
            )
            .await?;
        Ok(render_progress(events))
    }

    /// Push an image, yielding the rendered progress view after every update.
    ///
    /// # Errors
    ///
    /// Same as [`ImageManager::pull`].
    pub async fn push(
        &self,
        reference: &str,
        auth: &RegistryAuth,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let reference = ImageReference::parse(reference)?;
        info!("Pushing image: {}", reference);
        let events = self
            .engine
            .push_image(
                &reference.family(),
                reference.tag_or_default(),
                &auth.or(&self.default_auth),
            )
            .await?;
        Ok(render_progress(events))
    }

    /// Build an image from a tar context, yielding the build output.
    ///
    /// # Errors
    ///
    /// Fails fast on a malformed reference; a failing build step ends the
    /// stream with [`ContainerError::Protocol`].
    pub async fn build(
        &self,
        reference: &str,
        context: Bytes,
        options: &BuildOptions,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let reference = ImageReference::parse(reference)?;
        info!(
            "Building image: {} ({} byte context, no_cache={})",
            reference,
            context.len(),
            options.no_cache
        );
        let events = self
            .engine
            .build_image(&reference.url(), context, options.no_cache)
            .await?;
        Ok(render_build(events))
    }

    /// List tagged images.
    ///
    /// # Errors
    ///
    /// Returns error if the daemon call fails.
    pub async fn list(&self) -> Result<Vec<ImageSummary>> {
        let records = self.engine.list_images().await?;
        Ok(ImageSummary::from_records(records))
    }

    /// Remove an image.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if the image does not exist.
    pub async fn remove(&self, reference: &str) -> Result<()> {
        let reference = ImageReference::parse(reference)?;
        debug!("Removing image: {}", reference);
        self.engine.remove_image(&reference.url()).await?;
        info!("Removed image: {}", reference);
        Ok(())
    }
}

/// Pack a directory into an in-memory tar archive for use as build context.
///
/// # Errors
///
/// Returns error if the directory cannot be read.
pub fn pack_context(dir: &Path) -> Result<Bytes> {
    if !dir.is_dir() {
        return Err(ContainerError::ConfigError(format!(
            "Build context {} is not a directory",
            dir.display()
        )));
    }
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    let archive = builder.into_inner()?;
    debug!("Packed build context {} ({} bytes)", dir.display(), archive.len());
    Ok(Bytes::from(archive))
}
