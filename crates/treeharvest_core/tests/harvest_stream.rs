use rusqlite::{params, Connection};
use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::TempDir;
use treeharvest_core::db::open_db;
use treeharvest_core::{
    CancellationFlag, HarvestConfig, HarvestError, HarvestOutcome, HarvestRequest,
    JsonLdConverter, OaiErrorCode, RequestContext, SqliteStoreProvider, StoreProvider,
    TreeStreamEmitter, XmlEnvelope,
};

const DAY: i64 = 86_400_000;
const BASE: &str = "https://libris.kb.se/";

struct Catalog {
    _dir: TempDir,
    path: PathBuf,
    conn: Connection,
}

impl Catalog {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let conn = open_db(&path).unwrap();
        Self {
            _dir: dir,
            path,
            conn,
        }
    }

    fn insert(&self, id: &str, collection: &str, modified: i64, deleted: bool, data: &str) {
        let manifest = json!({"collection": collection}).to_string();
        self.insert_with_manifest(id, &manifest, modified, deleted, data);
    }

    fn insert_with_manifest(
        &self,
        id: &str,
        manifest: &str,
        modified: i64,
        deleted: bool,
        data: &str,
    ) {
        self.conn
            .execute(
                "INSERT INTO lddb (id, data, manifest, deleted, created, modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5);",
                params![id, data, manifest, i64::from(deleted), modified],
            )
            .unwrap();
        self.conn
            .execute(
                "INSERT INTO lddb__identifiers (id, identifier) VALUES (?1, ?2);",
                params![id, format!("{BASE}{id}")],
            )
            .unwrap();
    }

    fn bib(&self, id: &str, modified: i64, links: &[&str]) {
        self.insert(id, "bib", modified, false, &record(id, links, None).to_string());
    }
}

fn record(id: &str, links: &[&str], held_by: Option<&str>) -> Value {
    let mut thing = json!({
        "@id": format!("{BASE}{id}#it"),
        "label": id,
        "related": links
            .iter()
            .map(|link| json!({"@id": format!("{BASE}{link}")}))
            .collect::<Vec<_>>()
    });
    if let Some(notation) = held_by {
        thing["heldBy"] = json!({"@type": "Organization", "notation": notation});
    }
    json!({"@graph": [{"@id": format!("{BASE}{id}")}, thing]})
}

fn label_marker(id: &str) -> String {
    format!("&quot;label&quot;:&quot;{id}&quot;")
}

fn request(prefix: &str, set: Option<&str>, from: Option<&str>) -> HarvestRequest {
    HarvestRequest::parse(Some(prefix), set, from, None, false).unwrap()
}

fn run(catalog: &Catalog, request: &HarvestRequest) -> (HarvestOutcome, String) {
    run_with_flag(catalog, request, CancellationFlag::new()).unwrap()
}

fn run_with_flag(
    catalog: &Catalog,
    request: &HarvestRequest,
    flag: CancellationFlag,
) -> Result<(HarvestOutcome, String), HarvestError> {
    let config = HarvestConfig::default();
    let provider = SqliteStoreProvider::new(&catalog.path);
    let converter = JsonLdConverter;
    let emitter = TreeStreamEmitter::new(&provider, &converter, &config).with_cancellation(flag);

    let candidates = provider.acquire()?;
    let context = RequestContext::new("ListRecords", config.repository_url.clone());
    let mut envelope = XmlEnvelope::new(Vec::new(), context).with_response_date(0);
    let outcome = emitter.respond_with_trees(&candidates, request, &mut envelope)?;
    Ok((outcome, String::from_utf8(envelope.into_inner()).unwrap()))
}

#[test]
fn expanded_records_carry_linked_graphs_and_tree_datestamp() {
    let catalog = Catalog::new();
    catalog.bib("R", 3 * DAY, &["X"]);
    catalog.bib("X", 5 * DAY, &[]);

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", None, None));

    assert_eq!(outcome, HarvestOutcome::Emitted { records: 2 });
    assert!(xml.contains("<ListRecords><record><header><identifier>https://libris.kb.se/R</identifier><datestamp>1970-01-06T00:00:00Z</datestamp><setSpec>bib</setSpec></header>"));
    assert_eq!(xml.matches(&label_marker("X")).count(), 2);
    assert_eq!(xml.matches(&label_marker("R")).count(), 1);
    assert!(xml.find("https://libris.kb.se/R</identifier>").unwrap()
        < xml.find("https://libris.kb.se/X</identifier>").unwrap());
    assert!(xml.ends_with("</ListRecords></OAI-PMH>"));
}

#[test]
fn plain_format_emits_root_records_only() {
    let catalog = Catalog::new();
    catalog.bib("R", 3 * DAY, &["X"]);
    catalog.bib("X", 5 * DAY, &[]);

    let (outcome, xml) = run(&catalog, &request("jsonld", None, None));

    assert_eq!(outcome, HarvestOutcome::Emitted { records: 2 });
    assert_eq!(xml.matches(&label_marker("X")).count(), 1);
    assert!(xml.contains("<identifier>https://libris.kb.se/R</identifier><datestamp>1970-01-04T00:00:00Z</datestamp>"));
}

#[test]
fn empty_result_signals_no_records_match_without_list_framing() {
    let catalog = Catalog::new();
    catalog.bib("R", 3 * DAY, &[]);

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", None, Some("2000-01-01")));

    assert_eq!(outcome, HarvestOutcome::NoRecordsMatch);
    assert!(xml.contains("<error code=\"noRecordsMatch\">"));
    assert!(!xml.contains("<ListRecords>"));
    assert!(!xml.contains("<record>"));
}

#[test]
fn window_filter_uses_whole_tree_bounds() {
    let catalog = Catalog::new();
    catalog.bib("OLD_ROOT", DAY, &["FRESH"]);
    catalog.bib("FRESH", 20 * DAY, &[]);
    catalog.bib("STALE", DAY, &[]);

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", None, Some("1970-01-15")));

    assert_eq!(outcome, HarvestOutcome::Emitted { records: 2 });
    assert!(xml.contains("<identifier>https://libris.kb.se/OLD_ROOT</identifier><datestamp>1970-01-21T00:00:00Z</datestamp>"));
    assert!(!xml.contains("https://libris.kb.se/STALE</identifier>"));
}

#[test]
fn authority_records_are_left_out_of_trees() {
    let catalog = Catalog::new();
    catalog.bib("R", DAY, &["AUTH"]);
    catalog.insert("AUTH", "auth", 9 * DAY, false, &record("AUTH", &[], None).to_string());

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", Some("bib"), None));

    assert_eq!(outcome, HarvestOutcome::Emitted { records: 1 });
    assert!(!xml.contains(&label_marker("AUTH")));
    assert!(xml.contains("<datestamp>1970-01-02T00:00:00Z</datestamp>"));
}

#[test]
fn set_and_subset_narrow_candidates() {
    let catalog = Catalog::new();
    catalog.bib("B", DAY, &[]);
    let held_by_s = record("H1", &["B"], Some("S")).to_string();
    let held_by_t = record("H2", &["B"], Some("T")).to_string();
    catalog.insert("H1", "hold", 2 * DAY, false, &held_by_s);
    catalog.insert("H2", "hold", 2 * DAY, false, &held_by_t);

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", Some("hold"), None));
    assert_eq!(outcome, HarvestOutcome::Emitted { records: 2 });
    assert!(!xml.contains("https://libris.kb.se/B</identifier>"));

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", Some("hold:S"), None));
    assert_eq!(outcome, HarvestOutcome::Emitted { records: 1 });
    assert!(xml.contains("<identifier>https://libris.kb.se/H1</identifier>"));
    assert!(xml.contains("<setSpec>hold</setSpec><setSpec>hold:S</setSpec>"));
    assert!(xml.contains(&label_marker("B")));

    let (outcome, _) = run(&catalog, &request("jsonld:expanded", Some("hold:X"), None));
    assert_eq!(outcome, HarvestOutcome::NoRecordsMatch);
}

#[test]
fn identifiers_only_emits_bare_headers() {
    let catalog = Catalog::new();
    catalog.bib("R", DAY, &[]);
    let request =
        HarvestRequest::parse(Some("jsonld:expanded"), None, None, None, true).unwrap();

    let (outcome, xml) = run(&catalog, &request);

    assert_eq!(outcome, HarvestOutcome::Emitted { records: 1 });
    assert!(xml.contains("<ListIdentifiers><header><identifier>"));
    assert!(!xml.contains("<record>"));
    assert!(!xml.contains("<metadata>"));
}

#[test]
fn deleted_records_have_status_and_no_metadata() {
    let catalog = Catalog::new();
    catalog.insert("GONE", "bib", DAY, true, &record("GONE", &[], None).to_string());

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", None, None));

    assert_eq!(outcome, HarvestOutcome::Emitted { records: 1 });
    assert!(xml.contains("<header status=\"deleted\">"));
    assert!(!xml.contains("<metadata>"));
}

#[test]
fn malformed_roots_are_skipped() {
    let catalog = Catalog::new();
    catalog.insert("BROKEN", "bib", DAY, false, "{not json");
    catalog.bib("OK", DAY, &[]);

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", None, None));

    assert_eq!(outcome, HarvestOutcome::Emitted { records: 1 });
    assert!(!xml.contains("BROKEN"));
}

#[test]
fn deleted_root_with_unreadable_payload_still_gets_a_tombstone() {
    let catalog = Catalog::new();
    catalog.insert("GONE", "bib", 4 * DAY, true, "{not json");
    catalog.bib("OK", DAY, &[]);

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", None, None));

    assert_eq!(outcome, HarvestOutcome::Emitted { records: 2 });
    assert!(xml.contains("<header status=\"deleted\"><identifier>https://libris.kb.se/GONE</identifier><datestamp>1970-01-05T00:00:00Z</datestamp><setSpec>bib</setSpec></header>"));
    assert_eq!(xml.matches("<metadata>").count(), 1);

    let (outcome, _) = run(&catalog, &request("jsonld:expanded", None, Some("1970-01-10")));
    assert_eq!(outcome, HarvestOutcome::NoRecordsMatch);
}

#[test]
fn linked_record_with_mistyped_manifest_is_left_out() {
    let catalog = Catalog::new();
    catalog.bib("R", 3 * DAY, &["X", "Y"]);
    catalog.insert_with_manifest(
        "X",
        r#"{"collection":5}"#,
        9 * DAY,
        false,
        &record("X", &[], None).to_string(),
    );
    catalog.bib("Y", 4 * DAY, &[]);

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", None, None));

    assert_eq!(outcome, HarvestOutcome::Emitted { records: 2 });
    assert!(!xml.contains(&label_marker("X")));
    assert!(!xml.contains("https://libris.kb.se/X</identifier>"));
    assert_eq!(xml.matches(&label_marker("Y")).count(), 2);
    assert!(xml.contains("<identifier>https://libris.kb.se/R</identifier><datestamp>1970-01-05T00:00:00Z</datestamp>"));
}

#[test]
fn candidate_with_mistyped_manifest_is_skipped() {
    let catalog = Catalog::new();
    catalog.insert_with_manifest(
        "BAD",
        r#"{"collection":5}"#,
        DAY,
        false,
        &record("BAD", &[], None).to_string(),
    );
    catalog.bib("A", DAY, &[]);
    catalog.bib("B", 2 * DAY, &[]);

    let (outcome, xml) = run(&catalog, &request("jsonld:expanded", None, None));

    assert_eq!(outcome, HarvestOutcome::Emitted { records: 2 });
    assert!(!xml.contains("BAD"));
    assert!(xml.contains("<identifier>https://libris.kb.se/A</identifier>"));
    assert!(xml.contains("<identifier>https://libris.kb.se/B</identifier>"));
}

#[test]
fn unsupported_format_is_rejected_before_traversal() {
    let catalog = Catalog::new();
    catalog.bib("R", DAY, &[]);

    let (outcome, xml) = run(&catalog, &request("marcxml:expanded", None, None));

    assert_eq!(
        outcome,
        HarvestOutcome::Rejected(OaiErrorCode::CannotDisseminateFormat)
    );
    assert!(xml.contains("<error code=\"cannotDisseminateFormat\">Unsupported format: marcxml:expanded</error>"));
}

#[test]
fn cancelled_request_fails() {
    let catalog = Catalog::new();
    catalog.bib("R", DAY, &[]);
    let flag = CancellationFlag::new();
    flag.cancel();

    let result = run_with_flag(&catalog, &request("jsonld:expanded", None, None), flag);

    assert!(matches!(result, Err(HarvestError::Cancelled)));
}
