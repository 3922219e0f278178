//! kgrecon reconciliation funnel
//!
//! Resolves free-text cell values against a knowledge-graph entity space:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    RECONCILIATION SERVICE                           │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  cells ──► BatchExecutor ──► FunnelController (one task per cell)   │
//! │                 │                 │                                 │
//! │                 │                 ├─► CandidateSource   (fast)      │
//! │                 │                 ├─► ContextReranker   (gated)     │
//! │                 │                 └─► ConsensusScorer   (pure)      │
//! │                 ▼                                                   │
//! │            BatchReport ──► SidecarOffloadManager (persist + strip)  │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure handling
//!
//! - **Collaborator down or slow**: empty candidate list or stage-1 ranking.
//! - **Cell pipeline error or panic**: that cell resolves to `None`.
//! - **Evidence write failure**: [`ServiceError::Persistence`] after the batch.
//!
//! All handles are built by the caller and injected; nothing here is global.

pub mod batch;
pub mod config;
pub mod error;
pub mod funnel;
pub mod mock;
pub mod scorer;
pub mod service;
pub mod sources;

pub use batch::{BatchEvent, BatchEventHandler, BatchExecutor, BatchReport};
pub use config::{ReconConfig, ScoringConfig, Weights};
pub use error::{ConfigError, FunnelError, ServiceError, SourceError};
pub use funnel::{merge_ranking, FunnelController, Resolution, ResolveTrace};
pub use scorer::{string_similarity, ConsensusScorer, ScoreBreakdown, Verdict};
pub use service::{OffloadPolicy, ReconciliationService};
pub use sources::{
    CandidateSource, ContextReranker, RankedCandidate, RerankRequest, RerankResponse,
    RerankerClient, TaggerClient,
};
