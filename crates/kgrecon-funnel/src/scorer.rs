//! Consensus scoring: one confidence value per candidate from three signals.
//!
//! ```text
//! popularity (raw, log scale) ──sigmoid──► s_norm     ┐
//! semantic similarity (0..1, optional) ──► s_semantic ├─ weighted sum ─► final ∈ [0,1]
//! edit distance(surface, label) ─────────► s_string   ┘
//! ```
//!
//! Pure CPU work: no I/O, no shared state, deterministic for a given input.

use crate::config::ScoringConfig;
use crate::error::FunnelError;
use kgrecon_model::{Candidate, Judgment};

/// Per-candidate signal breakdown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub popularity: f64,
    pub semantic: f64,
    pub string: f64,
    pub total: f64,
}

/// Outcome of scoring one candidate list.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub judgment: Judgment,
    /// Index of the highest-scoring candidate, first on ties.
    pub best: Option<usize>,
    /// Highest `final` score, 0 for an empty list.
    pub score: f64,
}

impl Verdict {
    /// The chosen candidate; only a match has one.
    pub fn matched<'a>(&self, candidates: &'a [Candidate]) -> Option<&'a Candidate> {
        match (self.judgment, self.best) {
            (Judgment::Matched, Some(i)) => candidates.get(i),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsensusScorer {
    config: ScoringConfig,
}

impl ConsensusScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Logistic compression of raw popularity into (0, 1).
    pub fn normalize_popularity(&self, raw: f64) -> f64 {
        1.0 / (1.0 + (-self.config.sigmoid_k * (raw - self.config.sigmoid_midpoint)).exp())
    }

    pub fn score(&self, surface_form: &str, candidate: &Candidate) -> Result<ScoreBreakdown, FunnelError> {
        let raw = candidate.features.popularity;
        if !raw.is_finite() {
            return Err(FunnelError::NonFiniteSignal {
                candidate: candidate.id.clone(),
                signal: "popularity",
            });
        }
        let semantic = candidate.features.semantic_similarity.unwrap_or(0.0);
        if !semantic.is_finite() {
            return Err(FunnelError::NonFiniteSignal {
                candidate: candidate.id.clone(),
                signal: "semantic similarity",
            });
        }
        let semantic = semantic.clamp(0.0, 1.0);
        let popularity = self.normalize_popularity(raw);
        let string = string_similarity(surface_form, &candidate.name);

        let w = &self.config.weights;
        let sum = w.popularity + w.semantic + w.string;
        let total = (w.popularity * popularity + w.semantic * semantic + w.string * string) / sum.max(1.0);

        Ok(ScoreBreakdown {
            popularity,
            semantic,
            string,
            total: total.clamp(0.0, 1.0),
        })
    }

    /// Score every candidate in place (display score and string signal) and
    /// decide the judgment from the best one.
    pub fn finalize(&self, surface_form: &str, candidates: &mut [Candidate]) -> Result<Verdict, FunnelError> {
        let mut best: Option<(usize, f64)> = None;
        for (i, candidate) in candidates.iter_mut().enumerate() {
            let breakdown = self.score(surface_form, candidate)?;
            candidate.score = breakdown.total * 100.0;
            candidate.features.string_similarity = Some(breakdown.string);
            candidate
                .features
                .extra
                .insert("popularity_normalized".to_string(), breakdown.popularity);
            if best.map_or(true, |(_, top)| breakdown.total > top) {
                best = Some((i, breakdown.total));
            }
        }

        Ok(match best {
            None => Verdict {
                judgment: Judgment::None,
                best: None,
                score: 0.0,
            },
            Some((i, score)) => Verdict {
                judgment: self.judge(score),
                best: Some(i),
                score,
            },
        })
    }

    /// Threshold buckets; boundary values belong to the higher bucket.
    pub fn judge(&self, score: f64) -> Judgment {
        if score >= self.config.matched_threshold {
            Judgment::Matched
        } else if score >= self.config.ambiguous_threshold {
            Judgment::Ambiguous
        } else {
            Judgment::None
        }
    }
}

/// `1 - levenshtein / max_len` over characters, in [0, 1]. Two empty
/// strings are identical.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(a, b);
    (1.0 - distance as f64 / max_len as f64).clamp(0.0, 1.0)
}
