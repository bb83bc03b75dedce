//! Stored record read models.
//!
//! # Responsibility
//! - Represent one catalog row as read by point lookup or candidate scan.
//! - Expose manifest-derived fields (`collection`) without re-parsing.
//!
//! # Invariants
//! - `payload` is the raw JSON-LD text exactly as stored; parsing is the
//!   traversal's job so a malformed node can be dropped in isolation.
//! - `modified` is epoch milliseconds, UTC.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Internal catalog record identifier.
pub type RecordId = String;

/// Epoch milliseconds, UTC.
pub type EpochMillis = i64;

/// Record manifest: catalog-level metadata stored beside the payload.
///
/// Only `collection` is interpreted; every other key is carried along.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    /// Parses manifest JSON text. Blank text is treated as an empty manifest.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
    }
}

/// Immutable snapshot of one record, read at traversal time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    /// Raw JSON-LD graph document.
    pub payload: String,
    /// Collection tag mirrored from `manifest.collection`.
    pub collection: Option<String>,
    pub manifest: Manifest,
    pub deleted: bool,
    pub modified: EpochMillis,
}

impl StoredRecord {
    /// Whether this record belongs to the given collection tag.
    pub fn is_in_collection(&self, collection: &str) -> bool {
        self.collection.as_deref() == Some(collection)
    }
}

/// One candidate root row yielded by a candidate scan.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRow {
    pub id: RecordId,
    pub manifest: Manifest,
    pub deleted: bool,
    pub modified: EpochMillis,
    /// Holder notation (`@graph[1].heldBy.notation`), when the record has one.
    pub holder_notation: Option<String>,
}

impl CandidateRow {
    pub fn collection(&self) -> Option<&str> {
        self.manifest.collection.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::Manifest;

    #[test]
    fn manifest_keeps_unknown_keys() {
        let manifest =
            Manifest::parse(r#"{"collection":"bib","changedIn":"xl"}"#).expect("valid manifest");
        assert_eq!(manifest.collection.as_deref(), Some("bib"));
        assert_eq!(manifest.extra.get("changedIn").and_then(|v| v.as_str()), Some("xl"));
    }

    #[test]
    fn blank_manifest_is_empty() {
        let manifest = Manifest::parse("  ").expect("blank manifest");
        assert_eq!(manifest, Manifest::default());
    }
}
