//! Reversible mapping between human names and daemon identifiers.
//!
//! Container names may contain any character, but the daemon only accepts
//! `[a-zA-Z0-9_-]`. Names outside that alphabet are hex-encoded behind a
//! marker prefix so they can be recovered from `ps` output. Image references
//! use `:` as tag separator, which is awkward on command lines and in table
//! output, so the display form swaps it for `@`.

use crate::container::{ContainerError, Result};
use crate::env::naming::{CONTAINER_MARKER, DEFAULT_TAG, SHORT_ID_LEN, TAG_SEPARATOR_ALIAS};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static LEGAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("container name pattern is valid"));

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([^/]+)/)?([^@:]+)(?:[@:](.+))?$").expect("image reference pattern is valid")
});

/// Map a human container name to a daemon-legal identifier.
///
/// Legal names pass through unchanged, except those that already start with
/// the marker: those are encoded too, otherwise decoding would misread them.
pub fn encode_container(name: &str) -> String {
    if LEGAL_NAME.is_match(name) && !name.starts_with(CONTAINER_MARKER) {
        return name.to_string();
    }
    format!("{}{}", CONTAINER_MARKER, hex::encode(name.as_bytes()))
}

/// Recover the human name from a daemon identifier.
///
/// Identifiers without the marker, or whose payload is not valid hex encoded
/// UTF-8, are returned unchanged.
pub fn decode_container(id: &str) -> String {
    let Some(payload) = id.strip_prefix(CONTAINER_MARKER) else {
        return id.to_string();
    };
    hex::decode(payload)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| id.to_string())
}

/// Swap `from` for `to` in the part of a reference after the registry host.
fn swap_tag_separator(reference: &str, from: char, to: char) -> String {
    match reference.split_once('/') {
        Some((host, rest)) => format!("{}/{}", host, rest.replace(from, &to.to_string())),
        None => reference.replace(from, &to.to_string()),
    }
}

/// Convert a daemon image reference to its display form (`name@tag`).
pub fn encode_image(reference: &str) -> String {
    swap_tag_separator(reference, ':', TAG_SEPARATOR_ALIAS)
}

/// Convert a display-form image reference back to the daemon form.
pub fn decode_image(reference: &str) -> String {
    swap_tag_separator(reference, TAG_SEPARATOR_ALIAS, ':')
}

/// Display form of an image with the default tag elided.
pub fn display_image(reference: &str) -> String {
    let encoded = encode_image(reference);
    let default_suffix = format!("{}{}", TAG_SEPARATOR_ALIAS, DEFAULT_TAG);
    match encoded.strip_suffix(&default_suffix) {
        Some(stripped) => stripped.to_string(),
        None => encoded,
    }
}

/// First 12 characters of a daemon id.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

/// A parsed `[repository/]name[:tag]` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host or namespace before the first `/`
    pub repository: Option<String>,
    /// Image name, possibly with further path segments
    pub name: String,
    /// Tag; the daemon applies `latest` when absent
    pub tag: Option<String>,
}

impl ImageReference {
    /// Parse a reference, accepting both `:` and `@` as tag separator.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::InvalidReference`] when the input does not
    /// match the grammar.
    pub fn parse(reference: &str) -> Result<Self> {
        let caps = REFERENCE
            .captures(reference)
            .ok_or_else(|| ContainerError::InvalidReference(reference.to_string()))?;

        Ok(Self {
            repository: caps.get(1).map(|m| m.as_str().to_string()),
            name: caps[2].to_string(),
            tag: caps.get(3).map(|m| m.as_str().to_string()),
        })
    }

    /// Repository and name without the tag.
    pub fn family(&self) -> String {
        match &self.repository {
            Some(repository) => format!("{}/{}", repository, self.name),
            None => self.name.clone(),
        }
    }

    /// Full reference in daemon form.
    pub fn url(&self) -> String {
        match &self.tag {
            Some(tag) => format!("{}:{}", self.family(), tag),
            None => self.family(),
        }
    }

    /// Tag, or the daemon default when none was given.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }
}

impl FromStr for ImageReference {
    type Err = ContainerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}
