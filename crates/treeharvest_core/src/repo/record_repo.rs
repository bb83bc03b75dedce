//! Record catalog contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide point lookups, identifier resolution and candidate scans over
//!   the `lddb` catalog.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Candidate scans step the statement lazily; at most one row is
//!   materialized at a time.
//! - A store owns its connection; dropping the store releases it.
//! - Malformed JSON in `data` never aborts a scan; it only hides the
//!   projections that read from it.

use crate::db::{open_db_reader, DbError};
use crate::model::record::{CandidateRow, Manifest, RecordId, StoredRecord};
use log::warn;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const CANDIDATE_SELECT_SQL: &str = "SELECT
    id,
    manifest,
    deleted,
    modified,
    CASE WHEN json_valid(data)
        THEN CAST(json_extract(data, '$.\"@graph\"[1].heldBy.notation') AS TEXT)
    END AS holder_notation
FROM lddb
WHERE 1 = 1";

const SUBSET_FILTER_SQL: &str = " AND json_valid(data)
    AND EXISTS (
        SELECT 1
        FROM json_each(lddb.data, '$.\"@graph\"') AS node
        WHERE json_extract(node.value, '$.heldBy.\"@type\"') = 'Organization'
          AND json_extract(node.value, '$.heldBy.notation') = ?
    )";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for catalog reads.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Predicates narrowing a candidate scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateFilter {
    /// Only records whose `manifest.collection` equals this tag.
    pub root_set: Option<String>,
    /// Only records held by the organization with this notation.
    pub subset: Option<String>,
    /// Only the record with this id.
    pub record_id: Option<RecordId>,
}

/// Point lookup of stored records.
pub trait RecordStore {
    fn fetch_record(&self, id: &str) -> RepoResult<Option<StoredRecord>>;
}

/// Maps an external absolute identifier to an internal record id.
pub trait IdentifierResolver {
    fn resolve(&self, identifier: &str) -> RepoResult<Option<RecordId>>;
}

/// Streamed scan of candidate root rows.
pub trait CandidateSource {
    /// Feeds matching rows to `visit` in storage order.
    ///
    /// Rows whose stored data cannot be parsed are skipped with a warning.
    /// Stops at the first error returned by `visit` and propagates it.
    fn scan_candidates<E, F>(&self, filter: &CandidateFilter, visit: F) -> Result<(), E>
    where
        E: From<RepoError>,
        F: FnMut(CandidateRow) -> Result<(), E>;
}

/// Scoped acquisition of an exclusively owned store.
///
/// One store is acquired per tree build and dropped when the build ends.
pub trait StoreProvider {
    type Store: RecordStore + IdentifierResolver + CandidateSource;

    fn acquire(&self) -> RepoResult<Self::Store>;
}

/// SQLite-backed catalog store owning one connection.
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl RecordStore for SqliteRecordStore {
    fn fetch_record(&self, id: &str) -> RepoResult<Option<StoredRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, data, manifest, deleted, modified
             FROM lddb
             WHERE id = ?1;",
        )?;

        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_stored_record_row(row)?));
        }

        Ok(None)
    }
}

impl IdentifierResolver for SqliteRecordStore {
    fn resolve(&self, identifier: &str) -> RepoResult<Option<RecordId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id
             FROM lddb__identifiers
             WHERE identifier = ?1
             ORDER BY pk ASC
             LIMIT 1;",
        )?;
        let id = stmt
            .query_row([identifier], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(id)
    }
}

impl CandidateSource for SqliteRecordStore {
    fn scan_candidates<E, F>(&self, filter: &CandidateFilter, mut visit: F) -> Result<(), E>
    where
        E: From<RepoError>,
        F: FnMut(CandidateRow) -> Result<(), E>,
    {
        let mut sql = String::from(CANDIDATE_SELECT_SQL);
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(record_id) = &filter.record_id {
            sql.push_str(" AND id = ?");
            bind_values.push(Value::Text(record_id.clone()));
        }

        if let Some(root_set) = &filter.root_set {
            sql.push_str(" AND json_extract(manifest, '$.collection') = ?");
            bind_values.push(Value::Text(root_set.clone()));
        }

        if let Some(subset) = &filter.subset {
            sql.push_str(SUBSET_FILTER_SQL);
            bind_values.push(Value::Text(subset.clone()));
        }

        let mut stmt = self.conn.prepare(&sql).map_err(RepoError::from)?;
        let mut rows = stmt
            .query(params_from_iter(bind_values))
            .map_err(RepoError::from)?;

        while let Some(row) = rows.next().map_err(RepoError::from)? {
            match parse_candidate_row(row) {
                Ok(candidate) => visit(candidate)?,
                Err(RepoError::InvalidData(reason)) => {
                    warn!(
                        "event=candidate_skipped module=repo status=skip reason=invalid_row detail={}",
                        reason
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

/// Opens one read-only SQLite store per acquisition.
#[derive(Debug, Clone)]
pub struct SqliteStoreProvider {
    path: PathBuf,
}

impl SqliteStoreProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl StoreProvider for SqliteStoreProvider {
    type Store = SqliteRecordStore;

    fn acquire(&self) -> RepoResult<SqliteRecordStore> {
        let conn = open_db_reader(&self.path)?;
        Ok(SqliteRecordStore::new(conn))
    }
}

fn parse_stored_record_row(row: &Row<'_>) -> RepoResult<StoredRecord> {
    let id: String = row.get("id")?;
    let manifest = parse_manifest(&id, row)?;

    Ok(StoredRecord {
        collection: manifest.collection.clone(),
        payload: row.get("data")?,
        deleted: parse_deleted(&id, row)?,
        modified: row.get("modified")?,
        manifest,
        id,
    })
}

fn parse_candidate_row(row: &Row<'_>) -> RepoResult<CandidateRow> {
    let id: String = row.get("id")?;

    Ok(CandidateRow {
        manifest: parse_manifest(&id, row)?,
        deleted: parse_deleted(&id, row)?,
        modified: row.get("modified")?,
        holder_notation: row.get("holder_notation")?,
        id,
    })
}

fn parse_manifest(id: &str, row: &Row<'_>) -> RepoResult<Manifest> {
    let text: String = row.get("manifest")?;
    Manifest::parse(&text).map_err(|err| {
        RepoError::InvalidData(format!("invalid manifest for record `{id}`: {err}"))
    })
}

fn parse_deleted(id: &str, row: &Row<'_>) -> RepoResult<bool> {
    match row.get::<_, i64>("deleted")? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid deleted value `{other}` for record `{id}`"
        ))),
    }
}
