//! The atomic unit under reconciliation.

use crate::recon::{Judgment, Recon};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Stable cell identifier, assigned once at creation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(Uuid);

impl CellId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CellId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A cell value travelling through the funnel.
///
/// `raw_value` is only readable: no reconciliation step can rewrite the
/// original text. The recon is the only mutable part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    id: CellId,
    raw_value: String,
    fingerprint: String,
    pub recon: Option<Recon>,
}

impl Cell {
    pub fn new(raw_value: impl Into<String>) -> Self {
        let raw_value = raw_value.into();
        Self {
            id: CellId::new(),
            fingerprint: fingerprint(&raw_value),
            raw_value,
            recon: None,
        }
    }

    /// Restore a cell whose identity was persisted elsewhere.
    pub fn with_id(id: CellId, raw_value: impl Into<String>, recon: Option<Recon>) -> Self {
        let raw_value = raw_value.into();
        Self {
            id,
            fingerprint: fingerprint(&raw_value),
            raw_value,
            recon,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn raw_value(&self) -> &str {
        &self.raw_value
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn has_value(&self) -> bool {
        !self.raw_value.is_empty()
    }

    pub fn is_reconciled(&self) -> bool {
        self.recon
            .as_ref()
            .map_or(false, |r| r.judgment == Judgment::Matched)
    }

    pub fn judgment(&self) -> Judgment {
        self.recon.as_ref().map_or(Judgment::None, |r| r.judgment)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.recon {
            Some(recon) => write!(
                f,
                "cell[{}] '{}' ({})",
                self.id, self.raw_value, recon.judgment
            ),
            None => write!(f, "cell[{}] '{}' (unreconciled)", self.id, self.raw_value),
        }
    }
}

/// Key-collision fingerprint: lowercase, punctuation to whitespace, tokens
/// deduplicated and sorted, rejoined with single spaces.
///
/// Only used for local batching and dedup, never as an identity.
pub fn fingerprint(value: &str) -> String {
    let lowered = value.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let tokens: BTreeSet<&str> = cleaned.split_whitespace().collect();
    tokens.into_iter().collect::<Vec<_>>().join(" ")
}
