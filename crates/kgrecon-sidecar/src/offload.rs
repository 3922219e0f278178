//! Offload / rehydrate protocol over a shared [`SidecarStore`].
//!
//! Store calls are blocking, so every operation runs on tokio's blocking
//! pool with owned inputs.

use crate::error::{Result, SidecarError};
use crate::store::{Correction, CorrectionEntry, EvidenceRow, EvidenceWrite, HeavyPayload, SidecarStore};
use kgrecon_model::{Cell, Judgment};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct SidecarOffloadManager {
    store: Arc<SidecarStore>,
}

impl SidecarOffloadManager {
    pub fn new(store: Arc<SidecarStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<SidecarStore> {
        &self.store
    }

    /// Upsert the lightweight verdict and heavy evidence of every cell that
    /// has a recon. `cells[i]` is written at `row_indices[i]`.
    ///
    /// Cells are left untouched; use [`offload`](Self::offload) to also strip
    /// the in-memory evidence.
    pub async fn persist(&self, dataset_id: &str, cells: &[Cell], row_indices: &[u64]) -> Result<usize> {
        let all: Vec<usize> = (0..cells.len()).collect();
        self.persist_selected(dataset_id, cells, row_indices, &all).await
    }

    /// Like [`persist`](Self::persist), restricted to `cells[i]` for each
    /// `i` in `selected`. Rows of unselected cells are not touched in the
    /// store, so evidence already offloaded for them survives.
    pub async fn persist_selected(
        &self,
        dataset_id: &str,
        cells: &[Cell],
        row_indices: &[u64],
        selected: &[usize],
    ) -> Result<usize> {
        let rows = evidence_rows(cells, row_indices, selected)?;
        if rows.is_empty() {
            return Ok(0);
        }
        let store = Arc::clone(&self.store);
        let dataset = dataset_id.to_string();
        let written = tokio::task::spawn_blocking(move || store.upsert_evidence(&dataset, &rows)).await??;
        debug!(dataset_id, written, "persisted evidence");
        Ok(written)
    }

    /// Persist, then strip `candidates` / `features` from every written cell.
    /// On error nothing is stripped.
    pub async fn offload(&self, dataset_id: &str, cells: &mut [Cell], row_indices: &[u64]) -> Result<usize> {
        let all: Vec<usize> = (0..cells.len()).collect();
        self.offload_selected(dataset_id, cells, row_indices, &all).await
    }

    /// Offload only the selected cells; the others are neither written nor
    /// stripped.
    pub async fn offload_selected(
        &self,
        dataset_id: &str,
        cells: &mut [Cell],
        row_indices: &[u64],
        selected: &[usize],
    ) -> Result<usize> {
        let written = self.persist_selected(dataset_id, cells, row_indices, selected).await?;
        let mut stripped = 0;
        for &idx in selected {
            if let Some(recon) = cells.get_mut(idx).and_then(|c| c.recon.as_mut()) {
                if recon.has_evidence() {
                    recon.strip_evidence();
                    stripped += 1;
                }
            }
        }
        info!(dataset_id, written, stripped, "offloaded evidence");
        Ok(written)
    }

    /// Evidence for the visible window `[start, start + limit)`.
    pub async fn fetch_range(&self, dataset_id: &str, start: u64, limit: u64) -> Result<Vec<EvidenceRow>> {
        let store = Arc::clone(&self.store);
        let dataset = dataset_id.to_string();
        tokio::task::spawn_blocking(move || store.fetch_range(&dataset, start, limit)).await?
    }

    /// Attach a transient copy of stored evidence to the cells in the window.
    /// `cells[i]` must sit at row `start + i`. Returns how many were rehydrated.
    pub async fn rehydrate(&self, dataset_id: &str, start: u64, cells: &mut [Cell]) -> Result<usize> {
        let rows = self.fetch_range(dataset_id, start, cells.len() as u64).await?;
        let mut applied = 0;
        for row in rows {
            let Some(payload) = row.payload.as_ref() else {
                continue;
            };
            let offset = (row.row_index - start) as usize;
            if let Some(recon) = cells.get_mut(offset).and_then(|c| c.recon.as_mut()) {
                payload.apply_to(recon);
                applied += 1;
            }
        }
        Ok(applied)
    }

    pub async fn count_by_judgment(&self, dataset_id: &str, judgment: Judgment) -> Result<u64> {
        let store = Arc::clone(&self.store);
        let dataset = dataset_id.to_string();
        tokio::task::spawn_blocking(move || store.count_by_judgment(&dataset, judgment)).await?
    }

    pub async fn judgment_counts(&self, dataset_id: &str) -> Result<Vec<(Judgment, u64)>> {
        let store = Arc::clone(&self.store);
        let dataset = dataset_id.to_string();
        tokio::task::spawn_blocking(move || store.judgment_counts(&dataset)).await?
    }

    /// Append a user override to the correction log.
    pub async fn log_correction(&self, dataset_id: &str, entry: CorrectionEntry) -> Result<Uuid> {
        let store = Arc::clone(&self.store);
        let dataset = dataset_id.to_string();
        let id = tokio::task::spawn_blocking(move || store.insert_correction(&dataset, &entry)).await??;
        info!(dataset_id, correction_id = %id, "logged correction");
        Ok(id)
    }

    pub async fn corrections(&self, dataset_id: &str) -> Result<Vec<Correction>> {
        let store = Arc::clone(&self.store);
        let dataset = dataset_id.to_string();
        tokio::task::spawn_blocking(move || store.corrections(&dataset)).await?
    }
}

fn evidence_rows(cells: &[Cell], row_indices: &[u64], selected: &[usize]) -> Result<Vec<EvidenceWrite>> {
    if cells.len() != row_indices.len() {
        return Err(SidecarError::LengthMismatch {
            cells: cells.len(),
            rows: row_indices.len(),
        });
    }
    Ok(selected
        .iter()
        .filter_map(|&idx| {
            let recon = cells.get(idx)?.recon.as_ref()?;
            Some(EvidenceWrite {
                row_index: row_indices[idx],
                judgment: recon.judgment,
                consensus_score: recon.consensus_score,
                payload: HeavyPayload::from_recon(recon),
            })
        })
        .collect())
}
