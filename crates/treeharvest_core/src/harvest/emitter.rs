//! Per-root harvest loop: build, filter, merge, encode.
//!
//! # Responsibility
//! - Turn each candidate root into one emitted record.
//! - Acquire one store per tree build and release it when the build ends.
//! - Defer opening the envelope until the first record survives the
//!   modification-window filter.
//!
//! # Invariants
//! - Candidates are processed in the order the source yields them.
//! - Only the open decision is deferred; records are never buffered.
//! - The emitted datestamp is the tree's latest modification time. A deleted
//!   root without a usable payload is still emitted as a bare tombstone
//!   header stamped with its own modification time.

use super::envelope::{OaiErrorCode, RecordHeader, ResponseEnvelope, ResponseKind};
use super::format::FormatConverter;
use super::request::{HarvestRequest, MetadataFormat, RequestError};
use super::{HarvestError, HarvestOutcome, HarvestResult};
use crate::cancel::CancellationFlag;
use crate::config::HarvestConfig;
use crate::model::record::{CandidateRow, EpochMillis};
use crate::repo::record_repo::{
    CandidateFilter, CandidateSource, IdentifierResolver, StoreProvider,
};
use crate::tree::builder::{ModificationBounds, RecordTree, TreeBuilder, TreeError};
use crate::tree::merge::merge;
use crate::tree::window::format_datestamp;
use log::{error, info, warn};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    NotStarted,
    Opened { records: usize },
    Closed,
}

/// Opens the envelope on the first emitted record.
///
/// `NotStarted -> Opened -> Closed`; closing straight from `NotStarted`
/// answers `noRecordsMatch` instead of writing any list framing.
struct EnvelopeGate<'e, E: ResponseEnvelope + ?Sized> {
    envelope: &'e mut E,
    kind: ResponseKind,
    state: GateState,
}

impl<'e, E: ResponseEnvelope + ?Sized> EnvelopeGate<'e, E> {
    fn new(envelope: &'e mut E, kind: ResponseKind) -> Self {
        Self {
            envelope,
            kind,
            state: GateState::NotStarted,
        }
    }

    fn emit(&mut self, header: &RecordHeader, metadata: Option<&str>) -> HarvestResult<()> {
        let records = match self.state {
            GateState::NotStarted => {
                self.envelope.open(self.kind)?;
                0
            }
            GateState::Opened { records } => records,
            GateState::Closed => return Err(HarvestError::EnvelopeState("record after close")),
        };
        self.state = GateState::Opened { records };

        self.envelope.record(header, metadata)?;
        self.state = GateState::Opened {
            records: records + 1,
        };
        Ok(())
    }

    fn finish(&mut self) -> HarvestResult<HarvestOutcome> {
        let previous = std::mem::replace(&mut self.state, GateState::Closed);
        match previous {
            GateState::NotStarted => {
                self.envelope.error(OaiErrorCode::NoRecordsMatch, "")?;
                Ok(HarvestOutcome::NoRecordsMatch)
            }
            GateState::Opened { records } => {
                self.envelope.close()?;
                Ok(HarvestOutcome::Emitted { records })
            }
            GateState::Closed => Err(HarvestError::EnvelopeState("envelope already closed")),
        }
    }
}

#[derive(Debug, Default)]
struct ScanStats {
    scanned: usize,
    skipped: usize,
    outside_window: usize,
}

/// Drives candidate roots through tree assembly into a response envelope.
pub struct TreeStreamEmitter<'a, P, C: ?Sized> {
    provider: &'a P,
    converter: &'a C,
    config: &'a HarvestConfig,
    cancel: CancellationFlag,
}

impl<'a, P, C> TreeStreamEmitter<'a, P, C>
where
    P: StoreProvider,
    C: FormatConverter + ?Sized,
{
    pub fn new(provider: &'a P, converter: &'a C, config: &'a HarvestConfig) -> Self {
        Self {
            provider,
            converter,
            config,
            cancel: CancellationFlag::new(),
        }
    }

    /// Observes `flag` before each candidate and at every traversal step.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// Answers a ListRecords / ListIdentifiers request.
    ///
    /// Expanded formats emit one merged tree per root; plain formats emit the
    /// root record alone. `candidates` is scanned over its own connection for
    /// the whole request.
    pub fn respond_with_trees<S, E>(
        &self,
        candidates: &S,
        request: &HarvestRequest,
        envelope: &mut E,
    ) -> HarvestResult<HarvestOutcome>
    where
        S: CandidateSource,
        E: ResponseEnvelope + ?Sized,
    {
        let started_at = Instant::now();
        let kind = if request.identifiers_only {
            ResponseKind::ListIdentifiers
        } else {
            ResponseKind::ListRecords
        };
        info!(
            "event=harvest_list module=harvest status=start verb={} prefix={} set={} from={:?} until={:?}",
            kind.element(),
            request.format.prefix(),
            request.set.as_ref().map_or("-", |set| set.root_set()),
            request.window.from,
            request.window.until
        );

        if let Some(outcome) = self.reject_unsupported(&request.format, envelope)? {
            return Ok(outcome);
        }

        let mut gate = EnvelopeGate::new(envelope, kind);
        let mut stats = ScanStats::default();
        let filter = request.candidate_filter();

        let scanned = candidates.scan_candidates(&filter, |row: CandidateRow| -> HarvestResult<()> {
            stats.scanned += 1;
            if self.cancel.is_cancelled() {
                return Err(HarvestError::Cancelled);
            }

            match self.build_tree(&row.id, request.format.is_expanded())? {
                Some(tree) => {
                    if !request.window.includes(&tree) {
                        stats.outside_window += 1;
                        return Ok(());
                    }
                    self.emit_record(
                        &mut gate,
                        &row,
                        tree,
                        &request.format,
                        request.identifiers_only,
                    )
                }
                None if row.deleted => {
                    if !request.window.includes_bounds(ModificationBounds::new(row.modified)) {
                        stats.outside_window += 1;
                        return Ok(());
                    }
                    self.emit_tombstone(&mut gate, &row)
                }
                None => {
                    stats.skipped += 1;
                    Ok(())
                }
            }
        });

        if let Err(err) = scanned {
            error!(
                "event=harvest_list module=harvest status=error scanned={} duration_ms={} error={}",
                stats.scanned,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        let outcome = gate.finish()?;
        info!(
            "event=harvest_list module=harvest status=ok outcome={:?} scanned={} skipped={} outside_window={} duration_ms={}",
            outcome,
            stats.scanned,
            stats.skipped,
            stats.outside_window,
            started_at.elapsed().as_millis()
        );
        Ok(outcome)
    }

    /// Answers a GetRecord request for an external identifier.
    ///
    /// The modification window does not apply; an expanded format yields the
    /// record's whole tree.
    pub fn respond_get_record<E>(
        &self,
        identifier: &str,
        format: &MetadataFormat,
        envelope: &mut E,
    ) -> HarvestResult<HarvestOutcome>
    where
        E: ResponseEnvelope + ?Sized,
    {
        let started_at = Instant::now();
        info!(
            "event=harvest_get module=harvest status=start prefix={} identifier={}",
            format.prefix(),
            identifier
        );

        if let Some(outcome) = self.reject_unsupported(format, envelope)? {
            return Ok(outcome);
        }

        let root = {
            let store = self.provider.acquire()?;
            match store.resolve(identifier)? {
                Some(id) => {
                    let filter = CandidateFilter {
                        record_id: Some(id),
                        ..CandidateFilter::default()
                    };
                    let mut found = None;
                    store.scan_candidates(&filter, |row| -> HarvestResult<()> {
                        found = Some(row);
                        Ok(())
                    })?;
                    found
                }
                None => None,
            }
        };

        let mut gate = EnvelopeGate::new(envelope, ResponseKind::GetRecord);
        if let Some(row) = root {
            match self.build_tree(&row.id, format.is_expanded())? {
                Some(tree) => self.emit_record(&mut gate, &row, tree, format, false)?,
                None if row.deleted => self.emit_tombstone(&mut gate, &row)?,
                None => {}
            }
        }

        let outcome = gate.finish()?;
        info!(
            "event=harvest_get module=harvest status=ok outcome={:?} duration_ms={}",
            outcome,
            started_at.elapsed().as_millis()
        );
        Ok(outcome)
    }

    fn reject_unsupported<E>(
        &self,
        format: &MetadataFormat,
        envelope: &mut E,
    ) -> HarvestResult<Option<HarvestOutcome>>
    where
        E: ResponseEnvelope + ?Sized,
    {
        if self.converter.supports(format.name()) {
            return Ok(None);
        }
        let rejection = RequestError::UnsupportedFormat(format.prefix());
        let code = rejection.error_code();
        warn!(
            "event=harvest_rejected module=harvest status=error error_code={} prefix={}",
            code.as_str(),
            format.prefix()
        );
        envelope.error(code, &rejection.to_string())?;
        Ok(Some(HarvestOutcome::Rejected(code)))
    }

    /// Builds one tree over a freshly acquired store.
    ///
    /// Returns `None` when the root vanished or its payload is malformed.
    fn build_tree(&self, root_id: &str, follow_links: bool) -> HarvestResult<Option<RecordTree>> {
        let store = self.provider.acquire()?;
        let built = TreeBuilder::new(&store, &store, self.config)
            .with_cancellation(&self.cancel)
            .with_link_following(follow_links)
            .build(root_id);

        match built {
            Ok(tree) => Ok(Some(tree)),
            Err(TreeError::RootNotFound(id)) => {
                warn!(
                    "event=harvest_candidate module=harvest status=skip id={} reason=root_not_found",
                    id
                );
                Ok(None)
            }
            Err(TreeError::MalformedRoot { id, reason }) => {
                warn!(
                    "event=harvest_candidate module=harvest status=skip id={} reason=malformed_root detail={}",
                    id, reason
                );
                Ok(None)
            }
            Err(other) => Err(other.into()),
        }
    }

    fn emit_record<E>(
        &self,
        gate: &mut EnvelopeGate<'_, E>,
        row: &CandidateRow,
        tree: RecordTree,
        format: &MetadataFormat,
        identifiers_only: bool,
    ) -> HarvestResult<()>
    where
        E: ResponseEnvelope + ?Sized,
    {
        let header = self.header_for(row, tree.latest_modified())?;

        let metadata = if identifiers_only || row.deleted {
            None
        } else {
            let document = merge(tree);
            Some(self.converter.render(format.name(), &document)?)
        };

        gate.emit(&header, metadata.as_deref())
    }

    /// Writes a bare deleted header for a root whose payload cannot be
    /// assembled into a tree.
    fn emit_tombstone<E>(
        &self,
        gate: &mut EnvelopeGate<'_, E>,
        row: &CandidateRow,
    ) -> HarvestResult<()>
    where
        E: ResponseEnvelope + ?Sized,
    {
        let header = self.header_for(row, row.modified)?;
        gate.emit(&header, None)
    }

    fn header_for(
        &self,
        row: &CandidateRow,
        datestamp: EpochMillis,
    ) -> HarvestResult<RecordHeader> {
        Ok(RecordHeader {
            identifier: self.config.record_uri(&row.id),
            datestamp: format_datestamp(datestamp)?,
            set_specs: set_specs_for(row),
            deleted: row.deleted,
        })
    }
}

/// Set labels of a record: its collection, plus `<collection>:<holder>` when
/// the record is held by an organization.
fn set_specs_for(row: &CandidateRow) -> Vec<String> {
    let Some(collection) = row.collection() else {
        return Vec::new();
    };

    let mut set_specs = vec![collection.to_string()];
    if let Some(notation) = &row.holder_notation {
        set_specs.push(format!("{collection}:{}", notation.replace('"', "")));
    }
    set_specs
}

#[cfg(test)]
mod tests {
    use super::{set_specs_for, EnvelopeGate, GateState};
    use crate::harvest::envelope::{
        OaiErrorCode, RecordHeader, ResponseEnvelope, ResponseKind,
    };
    use crate::harvest::{HarvestOutcome, HarvestResult};
    use crate::model::record::{CandidateRow, Manifest};

    #[derive(Default)]
    struct RecordingEnvelope {
        calls: Vec<String>,
    }

    impl ResponseEnvelope for RecordingEnvelope {
        fn open(&mut self, kind: ResponseKind) -> HarvestResult<()> {
            self.calls.push(format!("open:{}", kind.element()));
            Ok(())
        }

        fn record(&mut self, header: &RecordHeader, _metadata: Option<&str>) -> HarvestResult<()> {
            self.calls.push(format!("record:{}", header.identifier));
            Ok(())
        }

        fn close(&mut self) -> HarvestResult<()> {
            self.calls.push("close".to_string());
            Ok(())
        }

        fn error(&mut self, code: OaiErrorCode, _message: &str) -> HarvestResult<()> {
            self.calls.push(format!("error:{}", code.as_str()));
            Ok(())
        }
    }

    fn header(identifier: &str) -> RecordHeader {
        RecordHeader {
            identifier: identifier.to_string(),
            datestamp: "1970-01-01T00:00:00Z".to_string(),
            set_specs: Vec::new(),
            deleted: false,
        }
    }

    #[test]
    fn gate_opens_once_on_first_record() {
        let mut envelope = RecordingEnvelope::default();
        let mut gate = EnvelopeGate::new(&mut envelope, ResponseKind::ListRecords);
        gate.emit(&header("a"), None).unwrap();
        gate.emit(&header("b"), None).unwrap();
        assert_eq!(gate.state, GateState::Opened { records: 2 });
        assert_eq!(gate.finish().unwrap(), HarvestOutcome::Emitted { records: 2 });
        assert!(gate.emit(&header("c"), None).is_err());

        assert_eq!(
            envelope.calls,
            vec!["open:ListRecords", "record:a", "record:b", "close"]
        );
    }

    #[test]
    fn gate_without_records_signals_no_match() {
        let mut envelope = RecordingEnvelope::default();
        let mut gate = EnvelopeGate::new(&mut envelope, ResponseKind::ListRecords);
        assert_eq!(gate.finish().unwrap(), HarvestOutcome::NoRecordsMatch);
        assert!(gate.finish().is_err());

        assert_eq!(envelope.calls, vec!["error:noRecordsMatch"]);
    }

    #[test]
    fn set_specs_include_holder_without_quotes() {
        let row = CandidateRow {
            id: "h1".to_string(),
            manifest: Manifest {
                collection: Some("hold".to_string()),
                ..Manifest::default()
            },
            deleted: false,
            modified: 0,
            holder_notation: Some("\"S\"".to_string()),
        };
        assert_eq!(set_specs_for(&row), vec!["hold", "hold:S"]);

        let no_collection = CandidateRow {
            manifest: Manifest::default(),
            ..row
        };
        assert!(set_specs_for(&no_collection).is_empty());
    }
}
