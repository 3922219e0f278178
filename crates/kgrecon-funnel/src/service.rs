//! Batch resolution plus evidence offload.

use crate::batch::{BatchExecutor, BatchReport};
use crate::error::ServiceError;
use kgrecon_model::Cell;
use kgrecon_sidecar::{SidecarError, SidecarOffloadManager};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

const PERSIST_BACKOFF: Duration = Duration::from_millis(100);

/// When heavy evidence leaves memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffloadPolicy {
    /// Offload and strip right after every batch.
    #[default]
    Immediate,
    /// Keep evidence in memory until [`ReconciliationService::commit_evidence`].
    Deferred,
}

pub struct ReconciliationService {
    executor: BatchExecutor,
    sidecar: SidecarOffloadManager,
    policy: OffloadPolicy,
    persist_retries: u32,
}

impl ReconciliationService {
    pub fn new(executor: BatchExecutor, sidecar: SidecarOffloadManager) -> Self {
        let persist_retries = executor.funnel().config().persist_retries;
        Self {
            executor,
            sidecar,
            policy: OffloadPolicy::default(),
            persist_retries,
        }
    }

    pub fn with_policy(mut self, policy: OffloadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> OffloadPolicy {
        self.policy
    }

    pub fn executor(&self) -> &BatchExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut BatchExecutor {
        &mut self.executor
    }

    pub fn sidecar(&self) -> &SidecarOffloadManager {
        &self.sidecar
    }

    /// Resolve a batch, then (under [`OffloadPolicy::Immediate`]) persist and
    /// strip its evidence. `cells[i]` lives at `row_indices[i]`.
    ///
    /// A persistence failure is reported only after every cell has resolved;
    /// the in-memory judgments stay in place either way.
    pub async fn reconcile(
        &self,
        dataset_id: &str,
        cells: &mut [Cell],
        row_indices: &[u64],
        contexts: &[Vec<String>],
    ) -> Result<BatchReport, ServiceError> {
        if cells.len() != row_indices.len() {
            return Err(ServiceError::LengthMismatch {
                cells: cells.len(),
                rows: row_indices.len(),
            });
        }

        let report = self.executor.run_batch(cells, contexts).await;

        if self.policy == OffloadPolicy::Immediate {
            if let Err((attempts, source)) = self
                .offload_with_retry(dataset_id, cells, row_indices, &report.resolved)
                .await
            {
                return Err(ServiceError::Persistence {
                    dataset_id: dataset_id.to_string(),
                    attempts,
                    report: Box::new(report),
                    source,
                });
            }
        }
        Ok(report)
    }

    /// Persist and strip evidence held back under [`OffloadPolicy::Deferred`].
    ///
    /// `report` is the one [`reconcile`](Self::reconcile) returned for these
    /// cells; only the cells it resolved are written.
    pub async fn commit_evidence(
        &self,
        dataset_id: &str,
        cells: &mut [Cell],
        row_indices: &[u64],
        report: &BatchReport,
    ) -> Result<usize, ServiceError> {
        self.offload_with_retry(dataset_id, cells, row_indices, &report.resolved)
            .await
            .map_err(|(attempts, source)| ServiceError::Persistence {
                dataset_id: dataset_id.to_string(),
                attempts,
                report: Box::new(report.clone()),
                source,
            })
    }

    async fn offload_with_retry(
        &self,
        dataset_id: &str,
        cells: &mut [Cell],
        row_indices: &[u64],
        resolved: &[usize],
    ) -> Result<usize, (u32, SidecarError)> {
        let attempts = self.persist_retries + 1;
        let mut attempt = 1;
        loop {
            match self
                .sidecar
                .offload_selected(dataset_id, cells, row_indices, resolved)
                .await
            {
                Ok(written) => {
                    info!(dataset_id, written, attempt, "batch evidence persisted");
                    return Ok(written);
                }
                Err(err @ SidecarError::LengthMismatch { .. }) => return Err((attempt, err)),
                Err(err) if attempt < attempts => {
                    warn!(dataset_id, attempt, attempts, error = %err, "evidence write failed, retrying");
                    tokio::time::sleep(PERSIST_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(dataset_id, attempts, error = %err, "evidence write failed");
                    return Err((attempt, err));
                }
            }
        }
    }
}
