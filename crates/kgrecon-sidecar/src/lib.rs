//! kgrecon sidecar evidence store
//!
//! Keeps heavy per-cell evidence out of the in-memory working set:
//!
//! ```text
//! ┌──────────────┐  offload   ┌──────────────────────┐
//! │  Cell.recon  │──────────► │   recon_evidence     │  PK (dataset_id, row_index)
//! │  (in memory) │            │   judgment, score,   │
//! │              │ ◄──────────│   heavy_payload JSON │
//! └──────────────┘ rehydrate  └──────────────────────┘
//!                             ┌──────────────────────┐
//!        user override ─────► │  recon_corrections   │  append-only
//!                             └──────────────────────┘
//! ```
//!
//! The store, not the cell, is the durable record of evidence. A rehydrated
//! copy on a cell is a view for display only.

pub mod error;
pub mod offload;
pub mod store;


pub use error::{Result, SidecarError};
pub use offload::SidecarOffloadManager;
pub use store::{Correction, CorrectionEntry, EvidenceRow, EvidenceWrite, HeavyPayload, SidecarStore};
