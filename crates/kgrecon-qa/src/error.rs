use thiserror::Error;

/// Bad gate configuration.
#[derive(Debug, Error)]
pub enum QaError {
    #[error("invalid {name} pattern: {source}")]
    InvalidPattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A rule check could not run to completion.
#[derive(Debug, Clone, Error)]
#[error("rule '{rule}' failed on record '{record}': {message}")]
pub struct RuleError {
    pub rule: String,
    pub record: String,
    pub message: String,
}

impl RuleError {
    pub fn new(rule: impl Into<String>, record: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            record: record.into(),
            message: message.into(),
        }
    }
}

/// Operational failure of a validation pass. Never a warning.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// Records whose dependency order cannot be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("record '{record}' depends on unknown record '{missing}'")]
    UnknownDependency { record: String, missing: String },

    #[error("duplicate record key '{0}'")]
    DuplicateKey(String),

    #[error("dependency cycle through {0:?}")]
    Cycle(Vec<String>),
}
