//! Link discovery inside JSON-LD payloads.
//!
//! The walk is an explicit stack over `serde_json::Value`. Children are pushed
//! in reverse so they pop in document order, which yields the same sequence a
//! recursive pre-order walk would.

use serde_json::Value;

struct Frame<'v> {
    key: Option<&'v str>,
    value: &'v Value,
}

/// Collects link candidates from `payload` in discovery order.
///
/// A link candidate is a string value stored directly under `link_key` inside
/// an object whose value starts with `link_prefix`. Scalars that sit directly
/// in arrays have no key and are never candidates. Object keys are visited in
/// the map's own order.
pub fn collect_links<'v>(payload: &'v Value, link_key: &str, link_prefix: &str) -> Vec<&'v str> {
    let mut links = Vec::new();
    let mut stack = vec![Frame {
        key: None,
        value: payload,
    }];

    while let Some(Frame { key, value }) = stack.pop() {
        match value {
            Value::Object(map) => {
                stack.extend(map.iter().rev().map(|(child_key, child)| Frame {
                    key: Some(child_key.as_str()),
                    value: child,
                }));
            }
            Value::Array(items) => {
                stack.extend(items.iter().rev().map(|child| Frame {
                    key: None,
                    value: child,
                }));
            }
            Value::String(text) => {
                if key == Some(link_key) && text.starts_with(link_prefix) {
                    links.push(text.as_str());
                }
            }
            _ => {}
        }
    }

    links
}

/// Rewrites a link into the form stored in the identifier table.
///
/// Every occurrence of `resource_segment` is removed; a blank segment leaves
/// the link untouched.
pub fn normalize_link(link: &str, resource_segment: &str) -> String {
    if resource_segment.is_empty() {
        return link.to_string();
    }
    link.replace(resource_segment, "")
}

#[cfg(test)]
mod tests {
    use super::{collect_links, normalize_link};
    use serde_json::json;

    #[test]
    fn collects_nested_links_in_document_order() {
        let payload = json!({
            "@graph": [
                {"@id": "https://libris.kb.se/r1", "sameAs": [{"@id": "http://libris.kb.se/resource/bib/1"}]},
                {"@id": "https://libris.kb.se/r1#it", "instanceOf": {"subject": [{"@id": "https://id.kb.se/term/a"}, {"@id": "https://id.kb.se/term/b"}]}}
            ]
        });

        let links = collect_links(&payload, "@id", "http");
        assert_eq!(
            links,
            vec![
                "https://libris.kb.se/r1",
                "http://libris.kb.se/resource/bib/1",
                "https://libris.kb.se/r1#it",
                "https://id.kb.se/term/a",
                "https://id.kb.se/term/b",
            ]
        );
    }

    #[test]
    fn ignores_relative_ids_other_keys_and_bare_array_strings() {
        let payload = json!({
            "@graph": [
                {"@id": "_:b0", "seeAlso": "https://example.org/x", "tags": ["https://example.org/y"]},
                {"@id": 42, "@type": "Instance"}
            ]
        });

        assert!(collect_links(&payload, "@id", "http").is_empty());
    }

    #[test]
    fn deeply_nested_arrays_are_walked() {
        let payload = json!({"a": [[[{"@id": "http://x/1"}]], {"b": {"@id": "http://x/2"}}]});
        assert_eq!(
            collect_links(&payload, "@id", "http"),
            vec!["http://x/1", "http://x/2"]
        );
    }

    #[test]
    fn normalize_strips_every_resource_segment() {
        assert_eq!(
            normalize_link("http://libris.kb.se/resource/bib/1", "resource/"),
            "http://libris.kb.se/bib/1"
        );
        assert_eq!(
            normalize_link("http://x/resource/resource/y", "resource/"),
            "http://x/y"
        );
        assert_eq!(normalize_link("http://x/resource/y", ""), "http://x/resource/y");
    }
}
