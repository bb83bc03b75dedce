//! Tree merge into one composite JSON-LD document.

use super::builder::RecordTree;
use crate::model::record::RecordId;
use serde_json::Value;

const GRAPH_KEY: &str = "@graph";

/// One exportable document synthesized from a [`RecordTree`].
///
/// Carries the root's id and every top-level field of the root payload; its
/// `@graph` is the concatenation of every node's graph in tree order.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDocument {
    id: RecordId,
    document: Value,
}

impl MergedDocument {
    /// Wraps an already merged document, e.g. one loaded from a fixture.
    pub fn from_parts(id: RecordId, document: Value) -> Self {
        Self { id, document }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn graph(&self) -> &[Value] {
        match self.document.get(GRAPH_KEY) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }
}

/// Folds a tree into one document.
///
/// The root payload is the base; linked payloads only contribute their
/// `@graph` entries, appended in tree order.
pub fn merge(tree: RecordTree) -> MergedDocument {
    let (id, mut document, linked_payloads) = tree.into_payloads();

    if let Some(Value::Array(graph)) = document.get_mut(GRAPH_KEY) {
        for payload in linked_payloads {
            if let Value::Object(mut node) = payload {
                if let Some(Value::Array(items)) = node.remove(GRAPH_KEY) {
                    graph.extend(items);
                }
            }
        }
    }

    MergedDocument { id, document }
}
