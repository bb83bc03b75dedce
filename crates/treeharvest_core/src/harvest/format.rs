//! Metadata format converters.
//!
//! A converter turns a merged document into the XML fragment written inside
//! a record's `metadata` element. Fragments are inserted verbatim.

use crate::tree::merge::MergedDocument;
use quick_xml::escape::escape;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const JSONLD_FORMAT: &str = "jsonld";
const JSONLD_ELEMENT: &str = "jsonld";

#[derive(Debug)]
pub enum ConversionError {
    UnsupportedFormat(String),
    Serialize(serde_json::Error),
}

impl Display for ConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedFormat(format) => write!(f, "unsupported format: {format}"),
            Self::Serialize(err) => write!(f, "failed to serialize document: {err}"),
        }
    }
}

impl Error for ConversionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnsupportedFormat(_) => None,
            Self::Serialize(err) => Some(err),
        }
    }
}

/// Renders merged documents into on-wire metadata fragments.
pub trait FormatConverter {
    /// Whether `format` (without `:expanded`) can be rendered.
    fn supports(&self, format: &str) -> bool;

    fn render(&self, format: &str, document: &MergedDocument) -> Result<String, ConversionError>;
}

/// Writes the merged JSON-LD as escaped text inside a `<jsonld>` element.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLdConverter;

impl FormatConverter for JsonLdConverter {
    fn supports(&self, format: &str) -> bool {
        format == JSONLD_FORMAT
    }

    fn render(&self, format: &str, document: &MergedDocument) -> Result<String, ConversionError> {
        if !self.supports(format) {
            return Err(ConversionError::UnsupportedFormat(format.to_string()));
        }
        let json =
            serde_json::to_string(document.document()).map_err(ConversionError::Serialize)?;
        Ok(format!("<{JSONLD_ELEMENT}>{}</{JSONLD_ELEMENT}>", escape(&json)))
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversionError, FormatConverter, JsonLdConverter};
    use crate::tree::merge::MergedDocument;

    fn document() -> MergedDocument {
        MergedDocument::from_parts(
            "r1".to_string(),
            serde_json::json!({"@graph": [{"@id": "https://libris.kb.se/r1", "title": "<a & b>"}]}),
        )
    }

    #[test]
    fn renders_escaped_json() {
        let fragment = JsonLdConverter.render("jsonld", &document()).unwrap();
        assert!(fragment.starts_with("<jsonld>{"));
        assert!(fragment.contains("&lt;a &amp; b&gt;"));
        assert!(!fragment.contains("<a & b>"));
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(!JsonLdConverter.supports("marcxml"));
        assert!(matches!(
            JsonLdConverter.render("marcxml", &document()),
            Err(ConversionError::UnsupportedFormat(_))
        ));
    }
}
