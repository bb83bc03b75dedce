//! Record-tree assembly and OAI-PMH harvest core.
//! Builds linked JSON-LD record trees from the catalog and streams them as
//! harvest responses.

pub mod cancel;
pub mod config;
pub mod db;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod repo;
pub mod tree;

pub use cancel::CancellationFlag;
pub use config::{AuthorityPolicy, ConfigError, HarvestConfig};
pub use harvest::{
    HarvestError, HarvestOutcome, HarvestRequest, HarvestResult, JsonLdConverter, MetadataFormat,
    OaiErrorCode, RequestContext, RequestError, ResponseKind, SetSpec, TreeStreamEmitter,
    XmlEnvelope,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::record::{CandidateRow, EpochMillis, Manifest, RecordId, StoredRecord};
pub use repo::record_repo::{
    CandidateFilter, CandidateSource, IdentifierResolver, RecordStore, RepoError, RepoResult,
    SqliteRecordStore, SqliteStoreProvider, StoreProvider,
};
pub use tree::{
    format_datestamp, merge, MergedDocument, ModificationBounds, ModificationWindow, RecordTree,
    TreeBuilder, TreeError, TreeResult, WindowError,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
