//! Engine configuration.
//!
//! Every tunable of the funnel lives here with its production default.
//! Loading (environment, JSON file) happens at the process edge; the engine
//! itself only ever receives a built, validated [`ReconConfig`].

use crate::error::ConfigError;
use kgrecon_model::{DEFAULT_IDENTIFIER_SPACE, DEFAULT_SCHEMA_SPACE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Scoring
// ============================================================================

/// Linear combination weights of the consensus score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub popularity: f64,
    pub semantic: f64,
    pub string: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            popularity: 0.4,
            semantic: 0.3,
            string: 0.3,
        }
    }
}

impl Weights {
    fn validate(&self) -> Result<(), ConfigError> {
        let all = [self.popularity, self.semantic, self.string];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Invalid(format!(
                "weights must be finite and non-negative, got {self:?}"
            )));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::Invalid("weights must not all be zero".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: Weights,
    /// Logistic steepness for popularity normalisation.
    pub sigmoid_k: f64,
    /// Raw popularity mapped to 0.5.
    pub sigmoid_midpoint: f64,
    /// `score >= matched_threshold` is a match.
    pub matched_threshold: f64,
    /// `ambiguous_threshold <= score < matched_threshold` is ambiguous.
    pub ambiguous_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            sigmoid_k: 2.0,
            sigmoid_midpoint: 3.0,
            matched_threshold: 0.85,
            ambiguous_threshold: 0.40,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        if !self.sigmoid_k.is_finite() || !self.sigmoid_midpoint.is_finite() {
            return Err(ConfigError::Invalid("sigmoid constants must be finite".to_string()));
        }
        let (lo, hi) = (self.ambiguous_threshold, self.matched_threshold);
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
            return Err(ConfigError::Invalid(format!(
                "thresholds must satisfy 0 <= ambiguous ({lo}) <= matched ({hi}) <= 1"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    /// Base URL of the full-text tagger.
    pub candidate_url: String,
    /// Base URL of the contextual disambiguation service.
    pub reranker_url: String,
    pub candidate_timeout_ms: u64,
    pub rerank_timeout_ms: u64,
    /// Simultaneous candidate-source calls across a batch.
    pub candidate_concurrency: usize,
    /// Simultaneous re-rank calls across a batch. Excess calls queue.
    pub rerank_concurrency: usize,
    /// Extra candidate-source attempts before falling back to no candidates.
    pub candidate_retries: u32,
    /// Candidates requested from the tagger.
    pub tag_limit: usize,
    /// Candidates the reranker is asked to rank.
    pub rerank_limit: usize,
    /// Skip re-ranking when the top raw popularity leads the runner-up by at
    /// least this much. `None` always re-ranks ambiguous cells.
    pub dominance_margin: Option<f64>,
    /// Extra sidecar write attempts after a batch.
    pub persist_retries: u32,
    pub identifier_space: String,
    pub schema_space: String,
    pub scoring: ScoringConfig,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            candidate_url: "http://localhost:8983/solr/wikidata".to_string(),
            reranker_url: "http://localhost:5005".to_string(),
            candidate_timeout_ms: 500,
            rerank_timeout_ms: 120_000,
            candidate_concurrency: 64,
            rerank_concurrency: 4,
            candidate_retries: 1,
            tag_limit: 10,
            rerank_limit: 3,
            dominance_margin: None,
            persist_retries: 2,
            identifier_space: DEFAULT_IDENTIFIER_SPACE.to_string(),
            schema_space: DEFAULT_SCHEMA_SPACE.to_string(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl ReconConfig {
    pub fn candidate_timeout(&self) -> Duration {
        Duration::from_millis(self.candidate_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }

    /// Defaults overlaid with `KGRECON_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each `KGRECON_*` key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = lookup("KGRECON_CANDIDATE_URL") {
            config.candidate_url = url;
        }
        if let Some(url) = lookup("KGRECON_RERANKER_URL") {
            config.reranker_url = url;
        }
        if let Some(v) = lookup("KGRECON_CANDIDATE_TIMEOUT_MS") {
            config.candidate_timeout_ms = parse_var("KGRECON_CANDIDATE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("KGRECON_RERANK_TIMEOUT_MS") {
            config.rerank_timeout_ms = parse_var("KGRECON_RERANK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("KGRECON_RERANK_CONCURRENCY") {
            config.rerank_concurrency = parse_var("KGRECON_RERANK_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("KGRECON_CANDIDATE_CONCURRENCY") {
            config.candidate_concurrency = parse_var("KGRECON_CANDIDATE_CONCURRENCY", &v)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;
        if self.candidate_concurrency == 0 || self.rerank_concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency ceilings must be non-zero".to_string()));
        }
        if self.candidate_timeout_ms == 0 || self.rerank_timeout_ms == 0 {
            return Err(ConfigError::Invalid("stage timeouts must be non-zero".to_string()));
        }
        if self.rerank_limit == 0 || self.tag_limit == 0 {
            return Err(ConfigError::Invalid("candidate limits must be non-zero".to_string()));
        }
        if let Some(margin) = self.dominance_margin {
            if !margin.is_finite() || margin < 0.0 {
                return Err(ConfigError::Invalid(format!("dominance margin {margin} must be >= 0")));
            }
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReconConfig::default();
        config.validate().unwrap();
        assert_eq!(config.candidate_timeout(), Duration::from_millis(500));
        assert_eq!(config.rerank_timeout(), Duration::from_secs(120));
        assert_eq!(config.scoring.weights, Weights { popularity: 0.4, semantic: 0.3, string: 0.3 });
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("KGRECON_CANDIDATE_URL", "http://tagger:8983/solr/kg"),
            ("KGRECON_RERANK_CONCURRENCY", "2"),
            ("KGRECON_CANDIDATE_TIMEOUT_MS", " 250 "),
        ]
        .into_iter()
        .collect();
        let config = ReconConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.candidate_url, "http://tagger:8983/solr/kg");
        assert_eq!(config.rerank_concurrency, 2);
        assert_eq!(config.candidate_timeout_ms, 250);
        assert_eq!(config.rerank_timeout_ms, 120_000);
    }

    #[test]
    fn test_env_rejects_garbage_and_zero() {
        let bad = ReconConfig::from_lookup(|k| (k == "KGRECON_RERANK_TIMEOUT_MS").then(|| "soon".to_string()));
        assert!(matches!(bad, Err(ConfigError::InvalidEnv { var: "KGRECON_RERANK_TIMEOUT_MS", .. })));

        let zero = ReconConfig::from_lookup(|k| (k == "KGRECON_RERANK_CONCURRENCY").then(|| "0".to_string()));
        assert!(matches!(zero, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_threshold_and_weight_validation() {
        let mut config = ReconConfig::default();
        config.scoring.ambiguous_threshold = 0.9;
        assert!(config.validate().is_err());

        let mut config = ReconConfig::default();
        config.scoring.weights = Weights { popularity: 0.0, semantic: 0.0, string: 0.0 };
        assert!(config.validate().is_err());

        let mut config = ReconConfig::default();
        config.scoring.weights.semantic = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ReconConfig =
            serde_json::from_str(r#"{"rerank_concurrency": 8, "scoring": {"matched_threshold": 0.9}}"#).unwrap();
        assert_eq!(config.rerank_concurrency, 8);
        assert_eq!(config.scoring.matched_threshold, 0.9);
        assert_eq!(config.scoring.ambiguous_threshold, 0.40);
        assert_eq!(config.candidate_timeout_ms, 500);
    }

    #[test]
    fn test_partial_weights_keep_other_defaults() {
        let config: ReconConfig = serde_json::from_str(r#"{"scoring": {"weights": {"semantic": 0.5}}}"#).unwrap();
        assert_eq!(config.scoring.weights.semantic, 0.5);
        assert_eq!(config.scoring.weights.popularity, 0.4);
        assert_eq!(config.scoring.weights.string, 0.3);
        config.validate().unwrap();
    }
}
