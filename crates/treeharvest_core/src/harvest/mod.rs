//! Harvest request handling over record trees.
//!
//! # Responsibility
//! - Drive candidate roots through build, filter, merge and encode.
//! - Defer opening the response until one record survives filtering.
//! - Map request and storage outcomes to OAI-PMH responses.
//!
//! # Invariants
//! - Storage failures abort the request; missing or malformed roots only
//!   skip the affected candidate.
//! - A request that emits nothing answers `noRecordsMatch` and writes no
//!   verb element.

use crate::repo::record_repo::RepoError;
use crate::tree::builder::TreeError;
use crate::tree::window::WindowError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod emitter;
pub mod envelope;
pub mod format;
pub mod request;

pub use emitter::TreeStreamEmitter;
pub use envelope::{
    OaiErrorCode, RecordHeader, RequestContext, ResponseEnvelope, ResponseKind, XmlEnvelope,
};
pub use format::{ConversionError, FormatConverter, JsonLdConverter};
pub use request::{HarvestRequest, MetadataFormat, RequestError, SetSpec};

pub type HarvestResult<T> = Result<T, HarvestError>;

/// Request-fatal harvest errors.
#[derive(Debug)]
pub enum HarvestError {
    Repo(RepoError),
    Tree(TreeError),
    Conversion(ConversionError),
    Datestamp(WindowError),
    Xml(quick_xml::Error),
    Io(std::io::Error),
    /// Envelope methods were called out of order.
    EnvelopeState(&'static str),
    Cancelled,
}

impl Display for HarvestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Conversion(err) => write!(f, "{err}"),
            Self::Datestamp(err) => write!(f, "{err}"),
            Self::Xml(err) => write!(f, "failed to write response: {err}"),
            Self::Io(err) => write!(f, "failed to write response: {err}"),
            Self::EnvelopeState(message) => write!(f, "invalid envelope state: {message}"),
            Self::Cancelled => write!(f, "harvest request cancelled"),
        }
    }
}

impl Error for HarvestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Tree(err) => Some(err),
            Self::Conversion(err) => Some(err),
            Self::Datestamp(err) => Some(err),
            Self::Xml(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::EnvelopeState(_) | Self::Cancelled => None,
        }
    }
}

impl From<RepoError> for HarvestError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<TreeError> for HarvestError {
    fn from(value: TreeError) -> Self {
        match value {
            TreeError::Repo(err) => Self::Repo(err),
            TreeError::Cancelled => Self::Cancelled,
            other => Self::Tree(other),
        }
    }
}

impl From<ConversionError> for HarvestError {
    fn from(value: ConversionError) -> Self {
        Self::Conversion(value)
    }
}

impl From<WindowError> for HarvestError {
    fn from(value: WindowError) -> Self {
        Self::Datestamp(value)
    }
}

impl From<quick_xml::Error> for HarvestError {
    fn from(value: quick_xml::Error) -> Self {
        Self::Xml(value)
    }
}

impl From<std::io::Error> for HarvestError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// How a request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// The verb element was written with this many records.
    Emitted { records: usize },
    /// No candidate survived; a `noRecordsMatch` error was written.
    NoRecordsMatch,
    /// The request was answered with an error before traversal began.
    Rejected(OaiErrorCode),
}
