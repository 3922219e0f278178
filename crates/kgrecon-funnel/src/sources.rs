//! External collaborators: the candidate source and the context reranker.
//!
//! Both are consumed through async traits so the funnel can run against the
//! HTTP services in production and against [`crate::mock`] in tests.

use crate::error::SourceError;
use async_trait::async_trait;
use kgrecon_model::Candidate;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Traits
// ============================================================================

/// Fast candidate generation: raw text in, ranked raw candidates out.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self, text: &str) -> Result<Vec<Candidate>, SourceError>;
}

/// Contextual re-ranking of an ambiguous candidate list.
#[async_trait]
pub trait ContextReranker: Send + Sync {
    async fn rerank(&self, request: &RerankRequest) -> Result<RerankResponse, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankRequest {
    pub surface_form: String,
    pub context_window: Vec<String>,
    /// Candidate ids in stage-1 order.
    pub candidates: Vec<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RerankResponse {
    #[serde(default, alias = "rankedCandidates")]
    pub ranked_candidates: Vec<RankedCandidate>,
    #[serde(default, alias = "inferredRelation", skip_serializing_if = "Option::is_none")]
    pub inferred_relation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub id: String,
    #[serde(alias = "semanticSimilarityScore")]
    pub semantic_similarity_score: f64,
}

// ============================================================================
// Full-text tagger client
// ============================================================================

#[derive(Debug, Deserialize)]
struct TagResponse {
    response: TagDocs,
}

#[derive(Debug, Deserialize)]
struct TagDocs {
    #[serde(default)]
    docs: Vec<TagDoc>,
}

#[derive(Debug, Deserialize)]
struct TagDoc {
    id: String,
    #[serde(default)]
    label: Option<Label>,
    #[serde(default)]
    popularity_score: f64,
    #[serde(default)]
    types: Vec<String>,
}

/// Multi-valued fields come back as arrays.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Label {
    One(String),
    Many(Vec<String>),
}

impl Label {
    fn into_first(self) -> Option<String> {
        match self {
            Label::One(s) => Some(s),
            Label::Many(v) => v.into_iter().next(),
        }
    }
}

/// Candidate source backed by a full-text tagger (`/tag` handler).
pub struct TaggerClient {
    client: reqwest::Client,
    base_url: String,
    tag_limit: usize,
}

impl TaggerClient {
    const SERVICE: &'static str = "candidate source";

    pub fn new(base_url: impl Into<String>, timeout: Duration, tag_limit: usize) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| SourceError::Http {
                service: Self::SERVICE,
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tag_limit,
        })
    }
}

#[async_trait]
impl CandidateSource for TaggerClient {
    async fn candidates(&self, text: &str) -> Result<Vec<Candidate>, SourceError> {
        let http = |source| SourceError::Http {
            service: Self::SERVICE,
            source,
        };
        let limit = self.tag_limit.to_string();
        let response = self
            .client
            .post(format!("{}/tag", self.base_url))
            .query(&[
                ("overlaps", "NO_SUB"),
                ("tagsLimit", limit.as_str()),
                ("fl", "id,label,popularity_score,types"),
                ("wt", "json"),
            ])
            .header(CONTENT_TYPE, "text/plain")
            .body(text.to_string())
            .send()
            .await
            .map_err(http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                service: Self::SERVICE,
                status: status.as_u16(),
            });
        }

        let body: TagResponse = response.json().await.map_err(http)?;
        Ok(body
            .response
            .docs
            .into_iter()
            .map(|doc| {
                let name = doc.label.and_then(Label::into_first).unwrap_or_default();
                let mut candidate = Candidate::new(doc.id, name, doc.popularity_score);
                candidate.types = doc.types;
                candidate
            })
            .collect())
    }
}

// ============================================================================
// Disambiguation service client
// ============================================================================

pub struct RerankerClient {
    client: reqwest::Client,
    base_url: String,
}

impl RerankerClient {
    const SERVICE: &'static str = "context reranker";

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|source| SourceError::Http {
                service: Self::SERVICE,
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ContextReranker for RerankerClient {
    async fn rerank(&self, request: &RerankRequest) -> Result<RerankResponse, SourceError> {
        let http = |source| SourceError::Http {
            service: Self::SERVICE,
            source,
        };
        let response = self
            .client
            .post(format!("{}/disambiguate", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                service: Self::SERVICE,
                status: status.as_u16(),
            });
        }
        response.json().await.map_err(http)
    }
}
