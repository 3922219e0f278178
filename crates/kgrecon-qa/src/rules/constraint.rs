use super::Scrutinizer;
use crate::config::{compile, QaConfig};
use crate::error::{QaError, RuleError};
use crate::record::{ResolvedRecord, StatementValue};
use crate::warning::{QaWarning, Severity, WarningSink};
use regex::Regex;

pub const DATE_VALIDITY: &str = "constraint-date-validity";
pub const CHRONOLOGY: &str = "constraint-chronology";
pub const SINGLE_VALUE: &str = "constraint-single-value";

const SENDER: &str = "Constraint Gate";

/// Domain constraints within one record: date format, start/end ordering,
/// and single-value cardinality.
pub struct ConstraintScrutinizer {
    date: Regex,
    date_parts: Regex,
    chronology_pairs: Vec<(String, String)>,
    single_value: Vec<String>,
}

impl ConstraintScrutinizer {
    pub fn new(config: &QaConfig) -> Result<Self, QaError> {
        Ok(Self {
            date: compile("date", &config.date_pattern)?,
            date_parts: compile("date parts", r"^([+-]?)([0-9]{4,})-([0-9]{2})-([0-9]{2})")?,
            chronology_pairs: config.chronology_pairs.clone(),
            single_value: config.single_value_properties.clone(),
        })
    }

    /// Signed `(year, month, day)` for ordering.
    fn parse_date(&self, value: &str) -> Option<(i64, u32, u32)> {
        let caps = self.date_parts.captures(value)?;
        let year: i64 = caps[2].parse().ok()?;
        let month: u32 = caps[3].parse().ok()?;
        let day: u32 = caps[4].parse().ok()?;
        let year = if &caps[1] == "-" { -year } else { year };
        Some((year, month, day))
    }

    /// First well-formed date stated for `property`.
    fn first_date(
        &self,
        record: &ResolvedRecord,
        property: &str,
    ) -> Result<Option<(i64, u32, u32)>, RuleError> {
        for statement in record.statements.iter().filter(|s| s.property == property) {
            if let StatementValue::Time(value) = &statement.value {
                if !self.date.is_match(value) {
                    continue;
                }
                return self.parse_date(value).map(Some).ok_or_else(|| {
                    RuleError::new(
                        self.name(),
                        &record.key,
                        format!("date '{value}' passed validation but has no year-month-day prefix"),
                    )
                });
            }
        }
        Ok(None)
    }
}

impl Scrutinizer for ConstraintScrutinizer {
    fn name(&self) -> &str {
        "constraint"
    }

    fn scrutinize(&self, record: &ResolvedRecord, sink: &mut WarningSink) -> Result<(), RuleError> {
        for statement in &record.statements {
            if let StatementValue::Time(value) = &statement.value {
                if !self.date.is_match(value) {
                    sink.emit(
                        QaWarning::new(DATE_VALIDITY, Severity::Error, 1)
                            .with_sender(SENDER)
                            .with_message_key("qa.constraint.date_validity"),
                    );
                }
            }
        }

        for (start, end) in &self.chronology_pairs {
            let (Some(from), Some(to)) = (self.first_date(record, start)?, self.first_date(record, end)?) else {
                continue;
            };
            if from > to {
                sink.emit(
                    QaWarning::new(CHRONOLOGY, Severity::Error, 1)
                        .with_sender(SENDER)
                        .with_message_key("qa.constraint.chronology"),
                );
            }
        }

        for property in &self.single_value {
            let count = record
                .statements
                .iter()
                .filter(|s| &s.property == property)
                .count() as u64;
            if count > 1 {
                sink.emit(
                    QaWarning::new(SINGLE_VALUE, Severity::Warning, count)
                        .with_sender(SENDER)
                        .with_message_key("qa.constraint.single_value"),
                );
            }
        }
        Ok(())
    }
}
