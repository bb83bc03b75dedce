//! Depth-first record-tree traversal.
//!
//! # Responsibility
//! - Fetch a root record and every record transitively linked from it.
//! - Aggregate the earliest and latest modification time of included nodes.
//!
//! # Invariants
//! - Each id is fetched at most once; ids are marked visited before fetch,
//!   so cyclic links terminate.
//! - The root always contributes its payload; the authority guard only
//!   applies to linked records.
//! - Dangling links, unresolvable identifiers and malformed linked records
//!   (payload or stored row data) drop the affected branch; only storage
//!   failures abort the build.

use super::links::{collect_links, normalize_link};
use crate::cancel::CancellationFlag;
use crate::config::{AuthorityPolicy, HarvestConfig};
use crate::model::record::{EpochMillis, RecordId};
use crate::repo::record_repo::{IdentifierResolver, RecordStore, RepoError};
use log::debug;
use serde_json::Value;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

const GRAPH_KEY: &str = "@graph";

pub type TreeResult<T> = Result<T, TreeError>;

/// Errors that fail a whole tree.
#[derive(Debug)]
pub enum TreeError {
    /// The root id has no stored record.
    RootNotFound(RecordId),
    /// The root payload is not a JSON object with a `@graph` array.
    MalformedRoot { id: RecordId, reason: String },
    /// The request was cancelled mid-traversal.
    Cancelled,
    Repo(RepoError),
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RootNotFound(id) => write!(f, "root record not found: {id}"),
            Self::MalformedRoot { id, reason } => {
                write!(f, "malformed root record `{id}`: {reason}")
            }
            Self::Cancelled => write!(f, "tree build cancelled"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TreeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for TreeError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Earliest and latest modification time seen across a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModificationBounds {
    pub earliest: EpochMillis,
    pub latest: EpochMillis,
}

impl ModificationBounds {
    pub fn new(modified: EpochMillis) -> Self {
        Self {
            earliest: modified,
            latest: modified,
        }
    }

    /// Widens the bounds to cover `modified`.
    pub fn fold(&mut self, modified: EpochMillis) {
        self.earliest = self.earliest.min(modified);
        self.latest = self.latest.max(modified);
    }
}

/// One root record plus every included linked record.
///
/// The root payload is held apart from linked payloads, so a tree is never
/// empty.
#[derive(Debug, Clone)]
pub struct RecordTree {
    root_id: RecordId,
    root_payload: Value,
    visited: HashSet<RecordId>,
    linked_ids: Vec<RecordId>,
    linked_payloads: Vec<Value>,
    bounds: ModificationBounds,
}

impl RecordTree {
    fn with_root(root_id: RecordId, root_payload: Value, modified: EpochMillis) -> Self {
        let mut visited = HashSet::new();
        visited.insert(root_id.clone());
        Self {
            root_id,
            root_payload,
            visited,
            linked_ids: Vec::new(),
            linked_payloads: Vec::new(),
            bounds: ModificationBounds::new(modified),
        }
    }

    fn push_linked(&mut self, id: RecordId, payload: Value, modified: EpochMillis) {
        self.linked_ids.push(id);
        self.linked_payloads.push(payload);
        self.bounds.fold(modified);
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Whether the traversal touched `id`, including dropped branches.
    pub fn is_visited(&self, id: &str) -> bool {
        self.visited.contains(id)
    }

    /// Included node ids in merge order, root first.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> + '_ {
        std::iter::once(self.root_id.as_str()).chain(self.linked_ids.iter().map(String::as_str))
    }

    /// Included node payloads in merge order, root first.
    pub fn node_payloads(&self) -> impl Iterator<Item = &Value> + '_ {
        std::iter::once(&self.root_payload).chain(self.linked_payloads.iter())
    }

    /// Number of included nodes, root included.
    pub fn node_count(&self) -> usize {
        1 + self.linked_payloads.len()
    }

    pub fn bounds(&self) -> ModificationBounds {
        self.bounds
    }

    pub fn earliest_modified(&self) -> EpochMillis {
        self.bounds.earliest
    }

    pub fn latest_modified(&self) -> EpochMillis {
        self.bounds.latest
    }

    pub(crate) fn into_payloads(self) -> (RecordId, Value, Vec<Value>) {
        (self.root_id, self.root_payload, self.linked_payloads)
    }
}

/// Builds [`RecordTree`]s from one store and resolver.
///
/// A builder is one traversal context; it is not shared across requests.
pub struct TreeBuilder<'a, S: ?Sized, R: ?Sized> {
    store: &'a S,
    resolver: &'a R,
    config: &'a HarvestConfig,
    cancel: Option<&'a CancellationFlag>,
    follow_links: bool,
}

impl<'a, S, R> TreeBuilder<'a, S, R>
where
    S: RecordStore + ?Sized,
    R: IdentifierResolver + ?Sized,
{
    pub fn new(store: &'a S, resolver: &'a R, config: &'a HarvestConfig) -> Self {
        Self {
            store,
            resolver,
            config,
            cancel: None,
            follow_links: true,
        }
    }

    /// Checks `flag` before every fetch.
    pub fn with_cancellation(mut self, flag: &'a CancellationFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// With `false`, the tree holds the root record only.
    pub fn with_link_following(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    /// Builds the tree anchored at `root_id`.
    ///
    /// # Errors
    /// - [`TreeError::RootNotFound`] / [`TreeError::MalformedRoot`] when the
    ///   root itself cannot contribute.
    /// - [`TreeError::Cancelled`] when the cancellation flag is raised.
    /// - [`TreeError::Repo`] on storage failure.
    pub fn build(&self, root_id: &str) -> TreeResult<RecordTree> {
        let started_at = Instant::now();
        self.check_cancelled()?;

        let root = match self.store.fetch_record(root_id) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(TreeError::RootNotFound(root_id.to_string())),
            Err(RepoError::InvalidData(reason)) => {
                return Err(TreeError::MalformedRoot {
                    id: root_id.to_string(),
                    reason,
                })
            }
            Err(err) => return Err(err.into()),
        };
        let root_payload =
            parse_node_payload(&root.payload).map_err(|reason| TreeError::MalformedRoot {
                id: root_id.to_string(),
                reason,
            })?;

        let mut pending: Vec<RecordId> = Vec::new();
        if self.follow_links {
            self.push_links(&root_payload, &mut pending)?;
        }
        let mut tree = RecordTree::with_root(root_id.to_string(), root_payload, root.modified);

        while let Some(id) = pending.pop() {
            if !tree.visited.insert(id.clone()) {
                continue;
            }
            self.check_cancelled()?;

            let record = match self.store.fetch_record(&id) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(
                        "event=tree_branch_dropped module=tree root={} id={} reason=dangling_link",
                        root_id, id
                    );
                    continue;
                }
                Err(RepoError::InvalidData(reason)) => {
                    debug!(
                        "event=tree_branch_dropped module=tree root={} id={} reason=malformed_manifest detail={}",
                        root_id, id, reason
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let is_authority = record.is_in_collection(&self.config.authority_collection);
            if is_authority && self.config.authority_policy == AuthorityPolicy::Exclude {
                debug!(
                    "event=tree_branch_dropped module=tree root={} id={} reason=authority",
                    root_id, id
                );
                continue;
            }

            let payload = match parse_node_payload(&record.payload) {
                Ok(payload) => payload,
                Err(reason) => {
                    debug!(
                        "event=tree_branch_dropped module=tree root={} id={} reason=malformed_payload detail={}",
                        root_id, id, reason
                    );
                    continue;
                }
            };

            if !is_authority {
                self.push_links(&payload, &mut pending)?;
            }
            tree.push_linked(id, payload, record.modified);
        }

        debug!(
            "event=tree_build module=tree status=ok root={} nodes={} visited={} duration_ms={}",
            root_id,
            tree.node_count(),
            tree.visited.len(),
            started_at.elapsed().as_millis()
        );
        Ok(tree)
    }

    /// Resolves the links of one payload and schedules them so the first
    /// discovered link is visited next.
    fn push_links(&self, payload: &Value, pending: &mut Vec<RecordId>) -> TreeResult<()> {
        let links = collect_links(payload, &self.config.link_key, &self.config.link_prefix);
        let mut resolved = Vec::with_capacity(links.len());
        for link in links {
            let normalized = normalize_link(link, &self.config.resource_segment);
            match self.resolver.resolve(&normalized)? {
                Some(id) => resolved.push(id),
                None => debug!(
                    "event=link_unresolved module=tree identifier={}",
                    normalized
                ),
            }
        }
        pending.extend(resolved.into_iter().rev());
        Ok(())
    }

    fn check_cancelled(&self) -> TreeResult<()> {
        match self.cancel {
            Some(flag) if flag.is_cancelled() => Err(TreeError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Parses one node payload and checks the graph shape the merger relies on.
fn parse_node_payload(text: &str) -> Result<Value, String> {
    let value: Value = serde_json::from_str(text).map_err(|err| err.to_string())?;
    match &value {
        Value::Object(map) => match map.get(GRAPH_KEY) {
            Some(Value::Array(_)) => Ok(value),
            Some(_) => Err(format!("`{GRAPH_KEY}` is not an array")),
            None => Err(format!("missing `{GRAPH_KEY}`")),
        },
        _ => Err("payload is not a JSON object".to_string()),
    }
}
