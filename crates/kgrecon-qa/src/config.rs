use crate::error::QaError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Patterns and attribute lists the built-in scrutinizers check against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Identifier format of the target entity namespace.
    pub target_id_pattern: String,
    /// Identifier format of the property namespace (kind confusion).
    pub property_id_pattern: String,
    pub date_pattern: String,
    /// `(start, end)` attribute pairs where start must not exceed end.
    pub chronology_pairs: Vec<(String, String)>,
    /// Attributes allowed at most once per record.
    pub single_value_properties: Vec<String>,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            target_id_pattern: r"^Q[0-9]+$".to_string(),
            property_id_pattern: r"^P[0-9]+$".to_string(),
            date_pattern: r"^[+-]?[0-9]{4}-[0-9]{2}-[0-9]{2}T00:00:00Z$".to_string(),
            // date of birth / date of death
            chronology_pairs: vec![("P569".to_string(), "P570".to_string())],
            // capital / capital of
            single_value_properties: vec!["P36".to_string(), "P1376".to_string()],
        }
    }
}

impl QaConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, QaError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

pub(crate) fn compile(name: &'static str, pattern: &str) -> Result<regex::Regex, QaError> {
    regex::Regex::new(pattern).map_err(|source| QaError::InvalidPattern { name, source })
}
