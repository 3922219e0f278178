//! QA warnings and per-pass aggregation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Ordered so that `>=` comparisons read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Visible, never blocks.
    Warning,
    /// Blocks only under a strict export policy.
    Error,
    /// Always blocks.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaWarning {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_key: Option<String>,
}

impl QaWarning {
    pub fn new(kind: impl Into<String>, severity: Severity, count: u64) -> Self {
        Self {
            kind: kind.into(),
            severity,
            count,
            sender: None,
            message_key: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_message_key(mut self, key: impl Into<String>) -> Self {
        self.message_key = Some(key.into());
        self
    }
}

/// Collects warnings for one validation pass, merging by type.
///
/// The first warning of a type fixes its severity, sender and position;
/// later ones only add to its count.
#[derive(Debug, Default)]
pub struct WarningSink {
    warnings: Vec<QaWarning>,
    by_kind: HashMap<String, usize>,
}

impl WarningSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, warning: QaWarning) {
        match self.by_kind.get(&warning.kind) {
            Some(&idx) => self.warnings[idx].count += warning.count,
            None => {
                self.by_kind.insert(warning.kind.clone(), self.warnings.len());
                self.warnings.push(warning);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<QaWarning> {
        self.warnings
    }
}
