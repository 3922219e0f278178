use crate::batch::BatchReport;
use kgrecon_sidecar::SidecarError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A collaborator call that did not produce a usable answer.
///
/// Always absorbed by the funnel's fallbacks.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned HTTP {status}")]
    Status { service: &'static str, status: u16 },

    #[error("{service} timed out after {after_ms} ms")]
    Timeout { service: &'static str, after_ms: u64 },

    #[error("{service} unavailable: {message}")]
    Unavailable { service: &'static str, message: String },
}

/// Per-cell pipeline failure. The cell resolves to `judgment = None`.
#[derive(Debug, Error)]
pub enum FunnelError {
    #[error("candidate '{candidate}' has a non-finite {signal} signal")]
    NonFiniteSignal { candidate: String, signal: &'static str },
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{cells} cells but {rows} row indices")]
    LengthMismatch { cells: usize, rows: usize },

    /// Judgments are resolved and kept in memory; their evidence is not stored.
    #[error("evidence for dataset '{dataset_id}' not persisted after {attempts} attempts: {source}")]
    Persistence {
        dataset_id: String,
        attempts: u32,
        report: Box<BatchReport>,
        #[source]
        source: SidecarError,
    },
}
