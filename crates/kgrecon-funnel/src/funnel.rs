//! Per-cell pipeline.
//!
//! ```text
//! raw value ──► [1] candidate source ──► [2] ambiguity gate ──┬──► [4] consensus scorer ──► Recon
//!               (short timeout,            (>= 2 candidates?)  │
//!                retry, else [])                               └─► [3] context reranker
//!                                                                  (permit + long timeout,
//!                                                                   else stage-1 order)
//! ```
//!
//! Only stages 1 and 3 suspend. Both enforce their own timeout, so a hung
//! collaborator can delay a cell but never stall it indefinitely.

use crate::config::ReconConfig;
use crate::error::{FunnelError, SourceError};
use crate::scorer::ConsensusScorer;
use crate::sources::{CandidateSource, ContextReranker, RerankRequest, RerankResponse};
use kgrecon_model::{Candidate, Cell, Recon};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

/// What happened to one cell on its way through the funnel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveTrace {
    /// Failed candidate-source attempts.
    pub candidate_failures: u32,
    /// True when every candidate-source attempt failed.
    pub candidates_unavailable: bool,
    pub reranked: bool,
    /// Why the reranker answer was not used, if it was called and failed.
    pub rerank_fallback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub recon: Recon,
    pub trace: ResolveTrace,
}

/// Drives one cell through the funnel. Cheap to clone: every field is shared.
#[derive(Clone)]
pub struct FunnelController {
    source: Arc<dyn CandidateSource>,
    reranker: Arc<dyn ContextReranker>,
    scorer: Arc<ConsensusScorer>,
    config: Arc<ReconConfig>,
    candidate_permits: Arc<Semaphore>,
    rerank_permits: Arc<Semaphore>,
}

impl FunnelController {
    pub fn new(
        source: Arc<dyn CandidateSource>,
        reranker: Arc<dyn ContextReranker>,
        config: ReconConfig,
    ) -> Self {
        Self {
            source,
            reranker,
            scorer: Arc::new(ConsensusScorer::new(config.scoring)),
            candidate_permits: Arc::new(Semaphore::new(config.candidate_concurrency)),
            rerank_permits: Arc::new(Semaphore::new(config.rerank_concurrency)),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn scorer(&self) -> &ConsensusScorer {
        &self.scorer
    }

    /// Resolve `cell` and attach the resulting recon. `raw_value` is never
    /// touched.
    pub async fn resolve(&self, cell: &mut Cell, context: &[String]) -> Result<ResolveTrace, FunnelError> {
        let resolution = self.resolve_value(cell.raw_value(), context).await?;
        cell.recon = Some(resolution.recon);
        Ok(resolution.trace)
    }

    pub async fn resolve_value(&self, raw_value: &str, context: &[String]) -> Result<Resolution, FunnelError> {
        let mut trace = ResolveTrace::default();

        // [1] candidate generation
        let mut candidates = self.fetch_candidates(raw_value, &mut trace).await;

        // [2] ambiguity gate, [3] contextual re-rank
        let mut relation = None;
        if self.is_ambiguous(&candidates) {
            trace.reranked = true;
            match self.rerank(raw_value, context, &candidates).await {
                Ok(response) => {
                    candidates = merge_ranking(candidates, &response);
                    relation = response.inferred_relation;
                }
                Err(err) => {
                    warn!(surface_form = raw_value, error = %err, "re-rank failed, keeping stage-1 order");
                    trace.rerank_fallback = Some(err.to_string());
                }
            }
        }

        // [4] consensus
        let recon = self.score(raw_value, candidates, relation)?;
        Ok(Resolution { recon, trace })
    }

    /// Two or more candidates need context, unless the configured dominance
    /// margin says the popularity leader is clear.
    pub fn is_ambiguous(&self, candidates: &[Candidate]) -> bool {
        if candidates.len() < 2 {
            return false;
        }
        let Some(margin) = self.config.dominance_margin else {
            return true;
        };
        let mut popularity: Vec<f64> = candidates.iter().map(|c| c.features.popularity).collect();
        popularity.sort_by(|a, b| b.total_cmp(a));
        popularity[0] - popularity[1] < margin
    }

    async fn fetch_candidates(&self, raw_value: &str, trace: &mut ResolveTrace) -> Vec<Candidate> {
        let attempts = self.config.candidate_retries + 1;
        let limit = self.config.candidate_timeout();
        for attempt in 1..=attempts {
            let result = match self.candidate_permits.acquire().await {
                Ok(_permit) => match timeout(limit, self.source.candidates(raw_value)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout {
                        service: "candidate source",
                        after_ms: self.config.candidate_timeout_ms,
                    }),
                },
                Err(_) => Err(SourceError::Unavailable {
                    service: "candidate source",
                    message: "concurrency limiter closed".to_string(),
                }),
            };
            match result {
                Ok(candidates) => {
                    debug!(surface_form = raw_value, count = candidates.len(), attempt, "candidates fetched");
                    return candidates;
                }
                Err(err) => {
                    trace.candidate_failures += 1;
                    warn!(surface_form = raw_value, attempt, attempts, error = %err, "candidate source failed");
                }
            }
        }
        trace.candidates_unavailable = true;
        Vec::new()
    }

    async fn rerank(
        &self,
        raw_value: &str,
        context: &[String],
        candidates: &[Candidate],
    ) -> Result<RerankResponse, SourceError> {
        let request = RerankRequest {
            surface_form: raw_value.to_string(),
            context_window: context.to_vec(),
            candidates: candidates.iter().map(|c| c.id.clone()).collect(),
            limit: self.config.rerank_limit,
        };
        // Queue on the ceiling; the permit is released when this scope ends,
        // including when the timeout fires.
        let _permit = self
            .rerank_permits
            .acquire()
            .await
            .map_err(|_| SourceError::Unavailable {
                service: "context reranker",
                message: "concurrency limiter closed".to_string(),
            })?;
        timeout(self.config.rerank_timeout(), self.reranker.rerank(&request))
            .await
            .map_err(|_| SourceError::Timeout {
                service: "context reranker",
                after_ms: self.config.rerank_timeout_ms,
            })?
    }

    fn score(
        &self,
        raw_value: &str,
        mut candidates: Vec<Candidate>,
        inferred_relation: Option<String>,
    ) -> Result<Recon, FunnelError> {
        let verdict = self.scorer.finalize(raw_value, &mut candidates)?;

        let mut recon = Recon::new(&self.config.identifier_space, &self.config.schema_space);
        recon.judgment = verdict.judgment;
        recon.consensus_score = verdict.score;
        recon.inferred_relation = inferred_relation;
        if let Some(winner) = verdict.matched(&candidates) {
            recon.set_match(winner.clone());
        }
        if let Some(best) = verdict.best.and_then(|i| candidates.get(i)) {
            recon.features = Some(best.features.clone());
        }
        if !candidates.is_empty() {
            recon.candidates = Some(candidates);
        }
        Ok(recon)
    }
}

/// Reranked candidates first in the reranker's order with their semantic
/// signal set, then the rest in stage-1 order. Unknown ids are ignored.
pub fn merge_ranking(candidates: Vec<Candidate>, response: &RerankResponse) -> Vec<Candidate> {
    let mut remaining: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(remaining.len());
    for ranked in &response.ranked_candidates {
        let slot = remaining
            .iter_mut()
            .find(|c| c.as_ref().is_some_and(|c| c.id == ranked.id));
        if let Some(mut candidate) = slot.and_then(Option::take) {
            candidate.features.semantic_similarity = Some(ranked.semantic_similarity_score);
            merged.push(candidate);
        }
    }
    merged.extend(remaining.into_iter().flatten());
    merged
}
