//! Resolved records as handed to the gate.

use kgrecon_model::{Cell, Judgment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum StatementValue {
    /// Identifier of another entity.
    Item(String),
    /// Date-like value, e.g. `+1952-03-11T00:00:00Z`.
    Time(String),
    Text(String),
    Quantity(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub property: String,
    pub value: StatementValue,
}

impl Statement {
    pub fn item(property: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: StatementValue::Item(id.into()),
        }
    }

    pub fn time(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: StatementValue::Time(value.into()),
        }
    }
}

/// One record about to be exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    /// Unique within a validation pass; used for dependency ordering.
    pub key: String,
    /// Identifier of the entity the record resolves to.
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub judgment: Judgment,
    #[serde(default)]
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ResolvedRecord {
    pub fn new(key: impl Into<String>, subject: Option<String>, judgment: Judgment) -> Self {
        Self {
            key: key.into(),
            subject,
            judgment,
            statements: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    /// Record for a reconciled cell, keyed by its row.
    pub fn from_cell(row_index: u64, cell: &Cell) -> Self {
        let subject = cell
            .recon
            .as_ref()
            .and_then(|r| r.match_candidate.as_ref())
            .map(|c| c.id.clone());
        Self::new(format!("row-{row_index}"), subject, cell.judgment())
    }

    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.depends_on.push(key.into());
        self
    }

    pub fn is_reconciled(&self) -> bool {
        self.judgment == Judgment::Matched
    }
}
