//! Reconciliation verdicts and the evidence behind them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_IDENTIFIER_SPACE: &str = "http://www.wikidata.org/entity/";
pub const DEFAULT_SCHEMA_SPACE: &str = "http://www.wikidata.org/prop/direct/";

// ============================================================================
// Judgment
// ============================================================================

/// Verdict attached to one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Judgment {
    #[default]
    None,
    Matched,
    New,
    Ambiguous,
}

impl Judgment {
    pub const ALL: [Judgment; 4] = [
        Judgment::None,
        Judgment::Matched,
        Judgment::New,
        Judgment::Ambiguous,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Judgment::None => "none",
            Judgment::Matched => "matched",
            Judgment::New => "new",
            Judgment::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for Judgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown judgment '{0}'")]
pub struct ParseJudgmentError(pub String);

impl FromStr for Judgment {
    type Err = ParseJudgmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Judgment::None),
            "matched" => Ok(Judgment::Matched),
            "new" => Ok(Judgment::New),
            "ambiguous" => Ok(Judgment::Ambiguous),
            _ => Err(ParseJudgmentError(s.to_string())),
        }
    }
}

// ============================================================================
// Features
// ============================================================================

/// Raw signals backing a candidate's consensus score.
///
/// The three named signals are fixed; `extra` is the extension point for
/// additional named signals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Raw popularity as reported by the candidate source (unbounded log scale).
    pub popularity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub fn with_popularity(popularity: f64) -> Self {
        Self {
            popularity,
            ..Default::default()
        }
    }
}

// ============================================================================
// Candidate
// ============================================================================

/// A reconciliation target in the knowledge graph.
///
/// The id format is checked by the QA gate, never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    /// Consensus score on the 0-100 display scale; 0 until scored.
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub features: FeatureVector,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, popularity: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            score: 0.0,
            features: FeatureVector::with_popularity(popularity),
            types: Vec::new(),
        }
    }

    pub fn with_semantic_similarity(mut self, similarity: f64) -> Self {
        self.features.semantic_similarity = Some(similarity);
        self
    }
}

// ============================================================================
// Recon
// ============================================================================

/// The reconciliation verdict for one cell.
///
/// `judgment`, `match_candidate` and `consensus_score` are lightweight and
/// always kept in memory. `candidates` and `features` are heavy evidence:
/// `None` once offloaded, `Some` only right after scoring or after an
/// explicit rehydration (which is never the system of record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recon {
    pub judgment: Judgment,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_candidate: Option<Candidate>,
    /// Highest consensus score seen this run, in [0, 1].
    pub consensus_score: f64,
    /// Display score of the chosen match (0-100), 0 when unmatched.
    #[serde(default)]
    pub match_rank: f64,
    pub identifier_space: String,
    pub schema_space: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Candidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,
}

impl Default for Recon {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTIFIER_SPACE, DEFAULT_SCHEMA_SPACE)
    }
}

impl Recon {
    pub fn new(identifier_space: impl Into<String>, schema_space: impl Into<String>) -> Self {
        Self {
            judgment: Judgment::None,
            match_candidate: None,
            consensus_score: 0.0,
            match_rank: 0.0,
            identifier_space: identifier_space.into(),
            schema_space: schema_space.into(),
            inferred_relation: None,
            candidates: None,
            features: None,
        }
    }

    /// Mark `candidate` as the chosen identity.
    pub fn set_match(&mut self, candidate: Candidate) {
        self.judgment = Judgment::Matched;
        self.match_rank = candidate.score;
        self.match_candidate = Some(candidate);
    }

    /// Whether heavy evidence is currently attached.
    pub fn has_evidence(&self) -> bool {
        self.candidates.is_some() || self.features.is_some()
    }

    /// Drop heavy evidence from memory. Storage is untouched.
    pub fn strip_evidence(&mut self) {
        self.candidates = None;
        self.features = None;
    }
}
