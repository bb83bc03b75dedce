//! Harvest request model: metadata prefix, set spec, window.
//!
//! # Invariants
//! - A `:expanded` metadata prefix asks for linked-record trees; the plain
//!   prefix names the converter format.
//! - Set specs follow the OAI-PMH `setSpec` grammar with at most two levels:
//!   `<collection>[:<holder notation>]`.

use super::envelope::OaiErrorCode;
use crate::repo::record_repo::CandidateFilter;
use crate::tree::window::{ModificationWindow, WindowError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const EXPANDED_SUFFIX: &str = ":expanded";

static SET_SPEC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9\-_.!~*'()]+(:[A-Za-z0-9\-_.!~*'()]+)?$").expect("valid setSpec regex")
});

/// Request validation errors, each mapped to an OAI-PMH error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    MissingArgument(&'static str),
    InvalidSetSpec(String),
    InvalidWindow(WindowError),
    UnsupportedFormat(String),
}

impl RequestError {
    pub fn error_code(&self) -> OaiErrorCode {
        match self {
            Self::UnsupportedFormat(_) => OaiErrorCode::CannotDisseminateFormat,
            _ => OaiErrorCode::BadArgument,
        }
    }
}

impl Display for RequestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingArgument(name) => write!(f, "{name} argument required."),
            Self::InvalidSetSpec(value) => write!(f, "Invalid set: {value}"),
            Self::InvalidWindow(err) => write!(f, "{err}"),
            Self::UnsupportedFormat(value) => write!(f, "Unsupported format: {value}"),
        }
    }
}

impl Error for RequestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidWindow(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WindowError> for RequestError {
    fn from(value: WindowError) -> Self {
        Self::InvalidWindow(value)
    }
}

/// Parsed `metadataPrefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFormat {
    name: String,
    expanded: bool,
}

impl MetadataFormat {
    pub fn parse(prefix: &str) -> Result<Self, RequestError> {
        let prefix = prefix.trim();
        let (name, expanded) = match prefix.strip_suffix(EXPANDED_SUFFIX) {
            Some(name) => (name, true),
            None => (prefix, false),
        };
        if name.is_empty() {
            return Err(RequestError::MissingArgument("metadataPrefix"));
        }
        Ok(Self {
            name: name.to_string(),
            expanded,
        })
    }

    /// Converter format name, without the `:expanded` suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// The prefix as the client sent it.
    pub fn prefix(&self) -> String {
        if self.expanded {
            format!("{}{EXPANDED_SUFFIX}", self.name)
        } else {
            self.name.clone()
        }
    }
}

/// Parsed `set` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSpec {
    root_set: String,
    subset: Option<String>,
}

impl SetSpec {
    pub fn parse(text: &str) -> Result<Self, RequestError> {
        let text = text.trim();
        if !SET_SPEC_RE.is_match(text) {
            return Err(RequestError::InvalidSetSpec(text.to_string()));
        }
        let (root_set, subset) = match text.split_once(':') {
            Some((root_set, subset)) => (root_set, Some(subset.to_string())),
            None => (text, None),
        };
        Ok(Self {
            root_set: root_set.to_string(),
            subset,
        })
    }

    /// Collection tag of candidate roots.
    pub fn root_set(&self) -> &str {
        &self.root_set
    }

    /// Holder notation candidates must be held by.
    pub fn subset(&self) -> Option<&str> {
        self.subset.as_deref()
    }
}

/// One ListRecords / ListIdentifiers request after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestRequest {
    pub format: MetadataFormat,
    pub set: Option<SetSpec>,
    pub window: ModificationWindow,
    pub identifiers_only: bool,
}

impl HarvestRequest {
    /// Parses raw protocol arguments.
    pub fn parse(
        metadata_prefix: Option<&str>,
        set: Option<&str>,
        from: Option<&str>,
        until: Option<&str>,
        identifiers_only: bool,
    ) -> Result<Self, RequestError> {
        let prefix = metadata_prefix.ok_or(RequestError::MissingArgument("metadataPrefix"))?;
        Ok(Self {
            format: MetadataFormat::parse(prefix)?,
            set: set.map(SetSpec::parse).transpose()?,
            window: ModificationWindow::parse(from, until)?,
            identifiers_only,
        })
    }

    /// Storage predicates for the candidate scan.
    pub fn candidate_filter(&self) -> CandidateFilter {
        CandidateFilter {
            root_set: self.set.as_ref().map(|set| set.root_set.clone()),
            subset: self.set.as_ref().and_then(|set| set.subset.clone()),
            record_id: None,
        }
    }
}
