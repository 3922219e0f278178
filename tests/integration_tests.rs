//! Integration tests for the complete reconciliation pipeline
//!
//! These tests exercise the crates together:
//! - Funnel → BatchExecutor → Sidecar offload → rehydrate
//! - Sidecar facets and correction log across a reopen
//! - Resolved cells → ScrutinizerGate → export decision
//!
//! Run with: cargo test --test integration_tests

use kgrecon_funnel::mock::{MockCandidateSource, MockReranker};
use kgrecon_funnel::{BatchExecutor, FunnelController, ReconConfig, ReconciliationService};
use kgrecon_model::{Candidate, Cell, Judgment};
use kgrecon_qa::rules::integrity::{INVALID_FORMAT, P_TAG_CONFUSION};
use kgrecon_qa::{ExportPolicy, QaConfig, ResolvedRecord, ScrutinizerGate, Severity, Statement};
use kgrecon_sidecar::{CorrectionEntry, SidecarOffloadManager, SidecarStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn city_source() -> MockCandidateSource {
    MockCandidateSource::new()
        .with(
            "Berlin",
            vec![
                Candidate::new("Q64", "Berlin", 6.0),
                Candidate::new("Q821244", "Berlin Township", 0.5),
            ],
        )
        .with(
            "Paris",
            vec![
                Candidate::new("Q90", "Paris", 5.5),
                Candidate::new("Q167646", "Paris Las Vegas", 1.0),
            ],
        )
}

fn service_with(
    source: MockCandidateSource,
    reranker: MockReranker,
    config: ReconConfig,
    store: Arc<SidecarStore>,
) -> ReconciliationService {
    let funnel = FunnelController::new(Arc::new(source), Arc::new(reranker), config);
    ReconciliationService::new(BatchExecutor::new(funnel), SidecarOffloadManager::new(store))
}

// ============================================================================
// Funnel → Sidecar
// ============================================================================

#[tokio::test]
async fn test_reconcile_offload_and_rehydrate() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SidecarStore::open(dir.path().join("recon.db")).unwrap());
    let reranker = MockReranker::new()
        .with_similarity("Q64", 0.95)
        .with_similarity("Q90", 0.1)
        .with_similarity("Q167646", 0.9);
    let svc = service_with(city_source(), reranker, ReconConfig::default(), Arc::clone(&store));

    let mut cells = vec![
        Cell::new("Berlin"),
        Cell::new("Paris"),
        Cell::new("Atlantis"),
        Cell::new(""),
    ];
    let rows = [0, 1, 2, 3];
    let contexts = vec![
        vec!["Germany".to_string()],
        vec!["France".to_string(), "capital".to_string()],
    ];
    let report = svc.reconcile("cities", &mut cells, &rows, &contexts).await.unwrap();

    assert_eq!(report.processed, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.matched, 1);
    assert_eq!(report.ambiguous, 1);
    assert_eq!(report.none, 1);
    assert_eq!(cells[0].judgment(), Judgment::Matched);
    assert_eq!(cells[1].judgment(), Judgment::Ambiguous);
    assert_eq!(cells[2].judgment(), Judgment::None);
    assert!(cells[3].recon.is_none());

    // heavy evidence left memory but the verdicts stayed
    assert!(cells.iter().filter_map(|c| c.recon.as_ref()).all(|r| !r.has_evidence()));

    let facets = svc.sidecar().judgment_counts("cities").await.unwrap();
    assert_eq!(
        facets,
        vec![
            (Judgment::None, 1),
            (Judgment::Matched, 1),
            (Judgment::New, 0),
            (Judgment::Ambiguous, 1),
        ]
    );

    let restored = svc.sidecar().rehydrate("cities", 0, &mut cells[..2]).await.unwrap();
    assert_eq!(restored, 2);
    let paris = cells[1].recon.as_ref().unwrap();
    let ids: Vec<&str> = paris.candidates.as_ref().unwrap().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["Q167646", "Q90"], "reranked order is what gets stored");
    assert!(paris.features.is_some());
}

#[tokio::test]
async fn test_slow_cell_resolves_none_while_batch_completes() {
    let source = city_source()
        .with("Slow", vec![Candidate::new("Q1", "Slow", 5.0)])
        .with_delay("Slow", Duration::from_secs(5));
    let config = ReconConfig {
        candidate_timeout_ms: 50,
        ..Default::default()
    };
    let store = Arc::new(SidecarStore::open_in_memory().unwrap());
    let svc = service_with(source, MockReranker::new().with_similarity("Q64", 0.95), config, store);

    let mut cells = vec![Cell::new("Berlin"), Cell::new("Slow")];
    let report = svc.reconcile("cities", &mut cells, &[10, 11], &[]).await.unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.candidate_source_failures, 2);
    assert_eq!(cells[0].judgment(), Judgment::Matched);
    assert_eq!(cells[1].judgment(), Judgment::None);

    let rows = svc.sidecar().fetch_range("cities", 10, 2).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].judgment, Judgment::None);
    assert!(rows[1].payload.is_none());
}

// ============================================================================
// Correction log
// ============================================================================

#[tokio::test]
async fn test_corrections_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("recon.db");

    {
        let sidecar = SidecarOffloadManager::new(Arc::new(SidecarStore::open(&path).unwrap()));
        for (rejected, accepted) in [("Q167646", "Q90"), ("Q821244", "Q64")] {
            sidecar
                .log_correction(
                    "cities",
                    CorrectionEntry {
                        surface_form: "Paris".to_string(),
                        context_window: vec!["France".to_string()],
                        rejected_id: Some(rejected.to_string()),
                        accepted_id: accepted.to_string(),
                        consensus_score: Some(0.62),
                        comment: None,
                    },
                )
                .await
                .unwrap();
        }
        sidecar.store().close().unwrap();
    }

    let sidecar = SidecarOffloadManager::new(Arc::new(SidecarStore::open(&path).unwrap()));
    let log = sidecar.corrections("cities").await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].entry.accepted_id, "Q90");
    assert_eq!(log[1].entry.accepted_id, "Q64");
    assert_eq!(log[0].entry.context_window, vec!["France"]);
    assert!(sidecar.corrections("rivers").await.unwrap().is_empty());
}

// ============================================================================
// Funnel → QA gate
// ============================================================================

#[tokio::test]
async fn test_resolved_cells_pass_the_gate() {
    let store = Arc::new(SidecarStore::open_in_memory().unwrap());
    let svc = service_with(
        city_source(),
        MockReranker::new().with_similarity("Q64", 0.95),
        ReconConfig::default(),
        store,
    );
    let mut cells = vec![Cell::new("Berlin"), Cell::new("Paris")];
    svc.reconcile("cities", &mut cells, &[0, 1], &[]).await.unwrap();

    let records: Vec<ResolvedRecord> = cells
        .iter()
        .enumerate()
        .map(|(row, cell)| ResolvedRecord::from_cell(row as u64, cell))
        .collect();
    assert_eq!(records[0].subject.as_deref(), Some("Q64"));
    assert!(records[1].subject.is_none());

    let gate = ScrutinizerGate::with_default_rules(&QaConfig::default()).unwrap();
    let warnings = gate.validate(&records).unwrap();
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    assert!(!ExportPolicy::strict().blocks(&warnings));
}

#[tokio::test]
async fn test_property_identifier_match_blocks_export() {
    let source = MockCandidateSource::new().with(
        "instance of",
        vec![
            Candidate::new("P31", "instance of", 6.0),
            Candidate::new("Q21503252", "instance of (disambiguation)", 0.5),
        ],
    );
    let store = Arc::new(SidecarStore::open_in_memory().unwrap());
    let svc = service_with(
        source,
        MockReranker::new().with_similarity("P31", 0.95),
        ReconConfig::default(),
        store,
    );
    let mut cells = vec![Cell::new("instance of")];
    svc.reconcile("props", &mut cells, &[0], &[]).await.unwrap();
    assert_eq!(cells[0].judgment(), Judgment::Matched);

    let records = vec![ResolvedRecord::from_cell(0, &cells[0])];
    let gate = ScrutinizerGate::with_default_rules(&QaConfig::default()).unwrap();
    let warnings = gate.validate(&records).unwrap();

    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[0].kind, INVALID_FORMAT);
    assert_eq!(warnings[0].severity, Severity::Critical);
    assert_eq!(warnings[1].kind, P_TAG_CONFUSION);
    assert_eq!(warnings[1].severity, Severity::Warning);
    assert!(ScrutinizerGate::is_blocking(&warnings));
    assert!(ExportPolicy::default().blocks(&warnings));
}

#[test]
fn test_chronology_error_blocks_only_strict_export() {
    let records = vec![ResolvedRecord::new("row-0", Some("Q42".to_string()), Judgment::Matched)
        .with_statement(Statement::time("P569", "+2001-03-11T00:00:00Z"))
        .with_statement(Statement::time("P570", "+1952-05-11T00:00:00Z"))];

    let gate = ScrutinizerGate::with_default_rules(&QaConfig::default()).unwrap();
    let warnings = gate.validate(&records).unwrap();

    assert!(warnings.iter().any(|w| w.severity == Severity::Error));
    assert!(!ScrutinizerGate::is_blocking(&warnings));
    assert!(!ExportPolicy::default().blocks(&warnings));
    assert!(ExportPolicy::strict().blocks(&warnings));
}
