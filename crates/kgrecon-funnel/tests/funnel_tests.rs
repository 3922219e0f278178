//! Funnel and batch executor tests against in-process collaborators.
//!
//! Timing tests run on tokio's paused clock, so multi-second delays and
//! timeouts complete instantly and deterministically.

use kgrecon_funnel::mock::{MockCandidateSource, MockReranker};
use kgrecon_funnel::*;
use kgrecon_model::{Candidate, Cell, Judgment, Recon};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn executor(source: Arc<MockCandidateSource>, reranker: Arc<MockReranker>, config: ReconConfig) -> BatchExecutor {
    BatchExecutor::new(FunnelController::new(source, reranker, config))
}

fn record_events(executor: &mut BatchExecutor) -> Arc<Mutex<Vec<BatchEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    executor.on_event(Box::new(move |event| sink.lock().unwrap().push(event.clone())));
    events
}

fn paris_candidates() -> Vec<Candidate> {
    vec![
        Candidate::new("Q90", "Paris", 5.5),
        Candidate::new("Q167646", "Paris Las Vegas", 1.0),
    ]
}

fn berlin_candidates() -> Vec<Candidate> {
    vec![
        Candidate::new("Q64", "Berlin", 6.0),
        Candidate::new("Q821244", "Berlin Township", 0.5),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_cell_resolves_none_and_siblings_complete() {
    let source = Arc::new(
        MockCandidateSource::new()
            .with("Berlin", berlin_candidates())
            .with("Paris", paris_candidates())
            .with("Slow", vec![Candidate::new("Q1", "Slow", 5.0)])
            .with_delay("Slow", Duration::from_secs(5)),
    );
    let reranker = Arc::new(MockReranker::new().with_similarity("Q64", 0.95));
    let mut exec = executor(Arc::clone(&source), reranker, ReconConfig::default());
    let events = record_events(&mut exec);

    let mut cells = vec![Cell::new("Berlin"), Cell::new("Slow"), Cell::new("Paris")];
    let report = exec.run_batch(&mut cells, &[]).await;

    assert_eq!(report.processed, 3);
    assert_eq!(report.candidate_source_failures, 2, "one attempt plus one retry");
    assert_eq!(cells[1].judgment(), Judgment::None);
    assert!(cells[1].recon.as_ref().unwrap().candidates.is_none());
    assert_eq!(cells[0].judgment(), Judgment::Matched);
    assert_eq!(cells[2].judgment(), Judgment::Ambiguous);

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        BatchEvent::CandidateSourceFailed { cell_id, attempts: 2 } if *cell_id == cells[1].id()
    )));
    assert!(matches!(events.last(), Some(BatchEvent::BatchCompleted { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_rerank_ceiling_queues_excess_calls() {
    let mut source = MockCandidateSource::new();
    for i in 0..10 {
        source = source.with(format!("city {i}"), paris_candidates());
    }
    let reranker = Arc::new(
        MockReranker::new()
            .with_similarity("Q90", 0.8)
            .with_delay(Duration::from_secs(1)),
    );
    let config = ReconConfig {
        rerank_concurrency: 2,
        ..Default::default()
    };
    let exec = executor(Arc::new(source), Arc::clone(&reranker), config);

    let mut cells: Vec<Cell> = (0..10).map(|i| Cell::new(format!("city {i}"))).collect();
    let report = exec.run_batch(&mut cells, &[]).await;

    assert_eq!(reranker.calls(), 10);
    assert_eq!(reranker.peak_in_flight(), 2);
    assert_eq!(report.rerank_calls, 10);
    assert_eq!(report.rerank_fallbacks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rerank_timeouts_release_permits() {
    let mut source = MockCandidateSource::new();
    for i in 0..3 {
        source = source.with(format!("cell {i}"), paris_candidates());
    }
    let reranker = Arc::new(MockReranker::new().with_delay(Duration::from_secs(600)));
    let config = ReconConfig {
        rerank_concurrency: 1,
        ..Default::default()
    };
    let mut exec = executor(Arc::new(source), Arc::clone(&reranker), config);
    let events = record_events(&mut exec);

    let mut cells: Vec<Cell> = (0..3).map(|i| Cell::new(format!("cell {i}"))).collect();
    let report = exec.run_batch(&mut cells, &[]).await;

    assert_eq!(reranker.calls(), 3);
    assert_eq!(report.rerank_fallbacks, 3);
    for cell in &cells {
        let recon = cell.recon.as_ref().unwrap();
        let ids: Vec<&str> = recon.candidates.as_ref().unwrap().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["Q90", "Q167646"], "stage-1 order kept");
    }
    let fallbacks = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, BatchEvent::RerankFallback { .. }))
        .count();
    assert_eq!(fallbacks, 3);
}

#[tokio::test]
async fn test_failing_reranker_falls_back() {
    let source = Arc::new(MockCandidateSource::new().with("Paris", paris_candidates()));
    let reranker = Arc::new(MockReranker::new().failing());
    let exec = executor(source, reranker, ReconConfig::default());

    let mut cells = vec![Cell::new("Paris")];
    let report = exec.run_batch(&mut cells, &[]).await;
    assert_eq!(report.rerank_fallbacks, 1);
    assert_eq!(cells[0].judgment(), Judgment::Ambiguous);
}

#[tokio::test]
async fn test_panicking_cell_is_contained() {
    let source = Arc::new(
        MockCandidateSource::new()
            .with("Berlin", berlin_candidates())
            .panicking_on("boom"),
    );
    let reranker = Arc::new(MockReranker::new().with_similarity("Q64", 0.95));
    let mut exec = executor(source, reranker, ReconConfig::default());
    let events = record_events(&mut exec);

    let mut cells = vec![Cell::new("boom"), Cell::new("Berlin")];
    let report = exec.run_batch(&mut cells, &[]).await;

    assert_eq!(report.cell_errors, 1);
    assert_eq!(report.none, 1);
    assert_eq!(report.matched, 1);
    assert_eq!(cells[0].judgment(), Judgment::None);
    assert_eq!(cells[0].raw_value(), "boom");
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, BatchEvent::CellFailed { cell_id, .. } if *cell_id == cells[0].id())));
}

#[tokio::test]
async fn test_non_finite_signal_fails_only_that_cell() {
    let source = Arc::new(
        MockCandidateSource::new()
            .with("bad", vec![Candidate::new("Q1", "bad", f64::INFINITY)])
            .with("Berlin", berlin_candidates()),
    );
    let reranker = Arc::new(MockReranker::new().with_similarity("Q64", 0.95));
    let exec = executor(source, reranker, ReconConfig::default());

    let mut cells = vec![Cell::new("bad"), Cell::new("Berlin")];
    let report = exec.run_batch(&mut cells, &[]).await;
    assert_eq!(report.cell_errors, 1);
    assert_eq!(cells[0].judgment(), Judgment::None);
    assert_eq!(cells[1].judgment(), Judgment::Matched);
}

#[tokio::test]
async fn test_empty_and_matched_cells_are_skipped() {
    let source = Arc::new(MockCandidateSource::new().with("Berlin", berlin_candidates()));
    let reranker = Arc::new(MockReranker::new());
    let exec = executor(Arc::clone(&source), reranker, ReconConfig::default());

    let mut done = Cell::new("Berlin");
    let mut recon = Recon::default();
    recon.set_match(Candidate::new("Q64", "Berlin", 6.0));
    done.recon = Some(recon.clone());

    let mut cells = vec![Cell::new(""), done, Cell::new("Berlin")];
    let report = exec.run_batch(&mut cells, &[]).await;

    assert_eq!(report.skipped, 2);
    assert_eq!(report.processed, 1);
    assert_eq!(report.resolved, vec![2]);
    assert_eq!(source.calls(), 1);
    assert!(cells[0].recon.is_none());
    assert_eq!(cells[1].recon.as_ref(), Some(&recon));
    assert_eq!(report.distinct_fingerprints, 2);
}

#[tokio::test]
async fn test_reranked_order_and_winner() {
    let source = Arc::new(MockCandidateSource::new().with("Paris", paris_candidates()));
    let reranker = Arc::new(
        MockReranker::new()
            .with_similarity("Q167646", 0.9)
            .with_similarity("Q90", 0.1)
            .with_relation("P131"),
    );
    let funnel = FunnelController::new(source, reranker, ReconConfig::default());

    let mut cell = Cell::new("Paris");
    let context = vec!["France".to_string(), "capital".to_string()];
    let trace = funnel.resolve(&mut cell, &context).await.unwrap();
    assert!(trace.reranked);
    assert_eq!(trace.rerank_fallback, None);

    let recon = cell.recon.as_ref().unwrap();
    let candidates = recon.candidates.as_ref().unwrap();
    assert_eq!(candidates[0].id, "Q167646");
    assert_eq!(candidates[0].features.semantic_similarity, Some(0.9));
    // popularity and string similarity still favour the capital
    assert_eq!(recon.judgment, Judgment::Ambiguous);
    assert!(recon.match_candidate.is_none());
    assert_eq!(recon.features.as_ref().unwrap().popularity, 5.5);
    assert_eq!(recon.inferred_relation.as_deref(), Some("P131"));
    assert!(recon.consensus_score > 0.7 && recon.consensus_score < 0.85);
}

#[tokio::test]
async fn test_dominance_margin_skips_rerank() {
    let source = Arc::new(MockCandidateSource::new().with("Paris", paris_candidates()));
    let reranker = Arc::new(MockReranker::new().with_similarity("Q90", 1.0));
    let config = ReconConfig {
        dominance_margin: Some(2.0),
        ..Default::default()
    };
    let funnel = FunnelController::new(source, reranker.clone(), config);

    let mut cell = Cell::new("Paris");
    let trace = funnel.resolve(&mut cell, &[]).await.unwrap();
    assert!(!trace.reranked);
    assert_eq!(reranker.calls(), 0);
    assert!(!funnel.is_ambiguous(&paris_candidates()[..1]));
}

#[tokio::test]
async fn test_single_candidate_is_not_reranked() {
    let source = Arc::new(MockCandidateSource::new().with("Lyon", vec![Candidate::new("Q456", "Lyon", 4.0)]));
    let reranker = Arc::new(MockReranker::new());
    let funnel = FunnelController::new(source, reranker.clone(), ReconConfig::default());

    let mut cell = Cell::new("Lyon");
    funnel.resolve(&mut cell, &[]).await.unwrap();
    assert_eq!(reranker.calls(), 0);
    assert_eq!(cell.recon.as_ref().unwrap().candidates.as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn test_matched_recon_carries_match_and_rank() {
    let source = Arc::new(MockCandidateSource::new().with("Berlin", berlin_candidates()));
    let reranker = Arc::new(MockReranker::new().with_similarity("Q64", 0.95));
    let funnel = FunnelController::new(source, reranker, ReconConfig::default());

    let mut cell = Cell::new("Berlin");
    funnel.resolve(&mut cell, &[]).await.unwrap();
    let recon = cell.recon.as_ref().unwrap();
    assert_eq!(recon.judgment, Judgment::Matched);
    let winner = recon.match_candidate.as_ref().unwrap();
    assert_eq!(winner.id, "Q64");
    assert_eq!(recon.match_rank, winner.score);
    assert!((recon.consensus_score * 100.0 - winner.score).abs() < 1e-9);
    assert!(recon.has_evidence());
}
