//! Concurrency governor: runs one funnel task per cell and joins them all.
//!
//! ```text
//!            ┌── task(cell 0) ──┐
//! cells ─────┼── task(cell 1) ──┼──► join barrier ──► recon written back ──► BatchReport
//!            └── task(cell n) ──┘        (every task, panics included)
//!
//! candidate-source permits: wide (candidate_concurrency)
//! reranker permits:         narrow (rerank_concurrency), queued, released on timeout
//! ```

use crate::error::FunnelError;
use crate::funnel::{FunnelController, Resolution};
use kgrecon_model::{Cell, CellId, Judgment, Recon};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

// ============================================================================
// Events and report
// ============================================================================

/// Summary of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Cells that went through the funnel.
    pub processed: usize,
    /// Empty or already-matched cells left untouched.
    pub skipped: usize,
    pub matched: usize,
    pub ambiguous: usize,
    pub none: usize,
    pub candidate_source_failures: usize,
    pub rerank_calls: usize,
    pub rerank_fallbacks: usize,
    pub cell_errors: usize,
    pub distinct_fingerprints: usize,
    pub elapsed_ms: u64,
    /// Positions in the batch slice of the cells resolved by this run, in
    /// ascending order. Skipped cells are not listed.
    #[serde(skip)]
    pub resolved: Vec<usize>,
}

impl BatchReport {
    fn count(&mut self, judgment: Judgment) {
        match judgment {
            Judgment::Matched => self.matched += 1,
            Judgment::Ambiguous => self.ambiguous += 1,
            Judgment::None | Judgment::New => self.none += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchEvent {
    /// Every candidate-source attempt for a cell failed.
    CandidateSourceFailed { cell_id: CellId, attempts: u32 },
    /// The reranker failed and the cell kept its stage-1 ranking.
    RerankFallback { cell_id: CellId, reason: String },
    /// The cell's pipeline errored or panicked; it resolved to `None`.
    CellFailed { cell_id: CellId, error: String },
    BatchCompleted { report: BatchReport },
}

pub type BatchEventHandler = Box<dyn Fn(&BatchEvent) + Send + Sync>;

// ============================================================================
// Executor
// ============================================================================

pub struct BatchExecutor {
    funnel: FunnelController,
    event_handlers: Vec<BatchEventHandler>,
}

enum CellOutcome {
    Resolved(Resolution),
    Failed(String),
}

impl BatchExecutor {
    pub fn new(funnel: FunnelController) -> Self {
        Self {
            funnel,
            event_handlers: Vec::new(),
        }
    }

    pub fn funnel(&self) -> &FunnelController {
        &self.funnel
    }

    pub fn on_event(&mut self, handler: BatchEventHandler) {
        self.event_handlers.push(handler);
    }

    fn emit(&self, event: BatchEvent) {
        for handler in &self.event_handlers {
            handler(&event);
        }
    }

    /// Resolve every cell concurrently and return once all of them are done.
    ///
    /// `contexts[i]` is the context window of `cells[i]`; missing entries
    /// mean no context. No cell's failure affects another cell.
    pub async fn run_batch(&self, cells: &mut [Cell], contexts: &[Vec<String>]) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport::default();
        let fingerprints: HashSet<&str> = cells.iter().map(|c| c.fingerprint()).collect();
        report.distinct_fingerprints = fingerprints.len();

        let mut tasks: Vec<(usize, JoinHandle<Result<Resolution, FunnelError>>)> = Vec::new();
        for (idx, cell) in cells.iter().enumerate() {
            if !cell.has_value() || cell.is_reconciled() {
                report.skipped += 1;
                continue;
            }
            let funnel = self.funnel.clone();
            let raw_value = cell.raw_value().to_string();
            let context = contexts.get(idx).cloned().unwrap_or_default();
            tasks.push((
                idx,
                tokio::spawn(async move { funnel.resolve_value(&raw_value, &context).await }),
            ));
        }

        for (idx, handle) in tasks {
            let outcome = match handle.await {
                Ok(Ok(resolution)) => CellOutcome::Resolved(resolution),
                Ok(Err(err)) => CellOutcome::Failed(err.to_string()),
                Err(join_err) if join_err.is_panic() => CellOutcome::Failed("pipeline panicked".to_string()),
                Err(join_err) => CellOutcome::Failed(join_err.to_string()),
            };
            self.apply(&mut cells[idx], outcome, &mut report);
            report.resolved.push(idx);
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            processed = report.processed,
            skipped = report.skipped,
            matched = report.matched,
            ambiguous = report.ambiguous,
            none = report.none,
            cell_errors = report.cell_errors,
            elapsed_ms = report.elapsed_ms,
            "batch complete"
        );
        self.emit(BatchEvent::BatchCompleted {
            report: report.clone(),
        });
        report
    }

    fn apply(&self, cell: &mut Cell, outcome: CellOutcome, report: &mut BatchReport) {
        report.processed += 1;
        let cell_id = cell.id();
        match outcome {
            CellOutcome::Resolved(Resolution { recon, trace }) => {
                report.candidate_source_failures += trace.candidate_failures as usize;
                if trace.candidates_unavailable {
                    self.emit(BatchEvent::CandidateSourceFailed {
                        cell_id,
                        attempts: trace.candidate_failures,
                    });
                }
                if trace.reranked {
                    report.rerank_calls += 1;
                }
                if let Some(reason) = trace.rerank_fallback {
                    report.rerank_fallbacks += 1;
                    warn!(cell_id = %cell_id, reason = %reason, "cell kept stage-1 ranking");
                    self.emit(BatchEvent::RerankFallback { cell_id, reason });
                }
                report.count(recon.judgment);
                cell.recon = Some(recon);
            }
            CellOutcome::Failed(message) => {
                error!(cell_id = %cell_id, error = %message, "cell pipeline failed");
                report.cell_errors += 1;
                report.count(Judgment::None);
                let config = self.funnel.config();
                cell.recon = Some(Recon::new(&config.identifier_space, &config.schema_space));
                self.emit(BatchEvent::CellFailed {
                    cell_id,
                    error: message,
                });
            }
        }
    }
}
