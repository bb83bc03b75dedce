//! Harvest configuration.
//!
//! # Responsibility
//! - Hold catalog conventions the tree builder and emitter depend on.
//! - Load overrides from JSON; every field has a default.
//!
//! # Invariants
//! - A config returned by [`HarvestConfig::from_json_str`] or
//!   [`HarvestConfig::from_path`] has passed [`HarvestConfig::validate`].

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

const DEFAULT_BASE_URI: &str = "https://libris.kb.se/";
const DEFAULT_REPOSITORY_URL: &str = "http://localhost:8080/oaipmh/";
const DEFAULT_AUTHORITY_COLLECTION: &str = "auth";
const DEFAULT_LINK_KEY: &str = "@id";
const DEFAULT_LINK_PREFIX: &str = "http";
const DEFAULT_RESOURCE_SEGMENT: &str = "resource/";

/// How linked authority records take part in a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityPolicy {
    /// Linked authority records contribute nothing: no payload, no links.
    #[default]
    Exclude,
    /// Linked authority records contribute their payload, but their own links
    /// are never followed.
    OneLevel,
}

/// Catalog conventions used while assembling and emitting record trees.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestConfig {
    /// Prefix joined with a record id to form its public identifier.
    pub base_uri: String,
    /// Repository URL echoed in the OAI-PMH `request` element.
    pub repository_url: String,
    /// Collection tag of densely cross-linked authority records.
    pub authority_collection: String,
    pub authority_policy: AuthorityPolicy,
    /// JSON-LD key whose string values are link candidates.
    pub link_key: String,
    /// Link values must start with this prefix to be resolved.
    pub link_prefix: String,
    /// Path segment stripped from link values before resolution.
    pub resource_segment: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_uri: DEFAULT_BASE_URI.to_string(),
            repository_url: DEFAULT_REPOSITORY_URL.to_string(),
            authority_collection: DEFAULT_AUTHORITY_COLLECTION.to_string(),
            authority_policy: AuthorityPolicy::default(),
            link_key: DEFAULT_LINK_KEY.to_string(),
            link_prefix: DEFAULT_LINK_PREFIX.to_string(),
            resource_segment: DEFAULT_RESOURCE_SEGMENT.to_string(),
        }
    }
}

/// Errors from loading or validating a [`HarvestConfig`].
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// A field that must be non-blank is blank.
    EmptyField(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "invalid config: {err}"),
            Self::EmptyField(field) => write!(f, "config field `{field}` must not be blank"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::EmptyField(_) => None,
        }
    }
}

impl HarvestConfig {
    /// Parses a JSON config document, filling absent fields with defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&text)
    }

    /// Checks that every field the traversal matches against is non-blank.
    ///
    /// `resource_segment` may be blank (no normalization).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("base_uri", &self.base_uri),
            ("repository_url", &self.repository_url),
            ("authority_collection", &self.authority_collection),
            ("link_key", &self.link_key),
            ("link_prefix", &self.link_prefix),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyField(field));
            }
        }
        Ok(())
    }

    /// Public identifier of a record: `base_uri` joined with the record id.
    pub fn record_uri(&self, id: &str) -> String {
        format!("{}{}", self.base_uri, id)
    }
}
