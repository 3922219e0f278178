//! In-process collaborators for tests and offline runs.

use crate::error::SourceError;
use crate::sources::{CandidateSource, ContextReranker, RankedCandidate, RerankRequest, RerankResponse};
use async_trait::async_trait;
use kgrecon_model::Candidate;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Candidate source answering from a fixed table keyed by raw text.
#[derive(Default)]
pub struct MockCandidateSource {
    responses: HashMap<String, Vec<Candidate>>,
    delays: HashMap<String, Duration>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    calls: AtomicUsize,
}

impl MockCandidateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: impl Into<String>, candidates: Vec<Candidate>) -> Self {
        self.responses.insert(text.into(), candidates);
        self
    }

    /// Answer `text` only after `delay`.
    pub fn with_delay(mut self, text: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(text.into(), delay);
        self
    }

    pub fn failing_on(mut self, text: impl Into<String>) -> Self {
        self.failing.insert(text.into());
        self
    }

    /// Panic inside the call for `text`.
    pub fn panicking_on(mut self, text: impl Into<String>) -> Self {
        self.panicking.insert(text.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateSource for MockCandidateSource {
    async fn candidates(&self, text: &str) -> Result<Vec<Candidate>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.panicking.contains(text) {
            panic!("mock candidate source panicked on '{text}'");
        }
        if self.failing.contains(text) {
            return Err(SourceError::Unavailable {
                service: "candidate source",
                message: format!("mock failure for '{text}'"),
            });
        }
        Ok(self.responses.get(text).cloned().unwrap_or_default())
    }
}

/// Reranker scoring candidates from a fixed similarity table.
///
/// Tracks the peak number of simultaneous calls so tests can observe the
/// concurrency ceiling.
#[derive(Default)]
pub struct MockReranker {
    similarity: HashMap<String, f64>,
    inferred_relation: Option<String>,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockReranker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_similarity(mut self, id: impl Into<String>, score: f64) -> Self {
        self.similarity.insert(id.into(), score);
        self
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.inferred_relation = Some(relation.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight gauge even when the call is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContextReranker for MockReranker {
    async fn rerank(&self, request: &RerankRequest) -> Result<RerankResponse, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(SourceError::Status {
                service: "context reranker",
                status: 503,
            });
        }

        let mut ranked: Vec<RankedCandidate> = request
            .candidates
            .iter()
            .filter_map(|id| {
                self.similarity.get(id).map(|score| RankedCandidate {
                    id: id.clone(),
                    semantic_similarity_score: *score,
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.semantic_similarity_score.total_cmp(&a.semantic_similarity_score));
        ranked.truncate(request.limit);
        Ok(RerankResponse {
            ranked_candidates: ranked,
            inferred_relation: self.inferred_relation.clone(),
        })
    }
}
