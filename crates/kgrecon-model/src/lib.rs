//! kgrecon data model
//!
//! The types every other kgrecon crate exchanges:
//!
//! ```text
//! Cell ──owns──► Recon ──owns──► Vec<Candidate> (heavy, offloadable)
//!  │               │
//!  │               └── judgment / match / consensus_score (always in memory)
//!  │
//!  └── raw_value (immutable) + fingerprint (clustering key)
//! ```
//!
//! Heavy evidence (`Recon::candidates`, `Recon::features`) is optional by
//! construction: once it has been written to the sidecar store it is stripped
//! from memory, and only a transient rehydrated copy ever comes back.

pub mod cell;
pub mod recon;

pub use cell::{fingerprint, Cell, CellId};
pub use recon::{
    Candidate, FeatureVector, Judgment, ParseJudgmentError, Recon, DEFAULT_IDENTIFIER_SPACE,
    DEFAULT_SCHEMA_SPACE,
};
