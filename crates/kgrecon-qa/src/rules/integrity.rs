use super::Scrutinizer;
use crate::config::{compile, QaConfig};
use crate::error::{QaError, RuleError};
use crate::record::{ResolvedRecord, StatementValue};
use crate::warning::{QaWarning, Severity, WarningSink};
use regex::Regex;

pub const MISSING_IDENTITY: &str = "integrity-missing-identity";
pub const INVALID_FORMAT: &str = "integrity-invalid-format";
pub const P_TAG_CONFUSION: &str = "integrity-p-tag-confusion";

const SENDER: &str = "Integrity Gate";

/// Identity checks: reconciled records need a well-formed target identifier,
/// and no identifier anywhere on a record may be a property identifier.
pub struct IntegrityScrutinizer {
    target: Regex,
    property: Regex,
}

impl IntegrityScrutinizer {
    pub fn new(config: &QaConfig) -> Result<Self, QaError> {
        Ok(Self {
            target: compile("target identifier", &config.target_id_pattern)?,
            property: compile("property identifier", &config.property_id_pattern)?,
        })
    }

    fn warn(sink: &mut WarningSink, kind: &str, severity: Severity, key: &str) {
        sink.emit(
            QaWarning::new(kind, severity, 1)
                .with_sender(SENDER)
                .with_message_key(key),
        );
    }
}

impl Scrutinizer for IntegrityScrutinizer {
    fn name(&self) -> &str {
        "integrity"
    }

    fn scrutinize(&self, record: &ResolvedRecord, sink: &mut WarningSink) -> Result<(), RuleError> {
        if record.is_reconciled() {
            match record.subject.as_deref().map(str::trim) {
                None | Some("") => Self::warn(
                    sink,
                    MISSING_IDENTITY,
                    Severity::Critical,
                    "qa.integrity.missing_identity",
                ),
                Some(id) => {
                    if !self.target.is_match(id) {
                        Self::warn(sink, INVALID_FORMAT, Severity::Critical, "qa.integrity.invalid_format");
                    }
                    if self.property.is_match(id) {
                        Self::warn(sink, P_TAG_CONFUSION, Severity::Warning, "qa.integrity.p_tag_confusion");
                    }
                }
            }
        }

        for statement in &record.statements {
            if let StatementValue::Item(id) = &statement.value {
                if self.property.is_match(id.trim()) {
                    Self::warn(
                        sink,
                        P_TAG_CONFUSION,
                        Severity::Warning,
                        "qa.integrity.p_tag_confusion",
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Statement;
    use kgrecon_model::Judgment;

    fn run(record: &ResolvedRecord) -> Vec<QaWarning> {
        let rule = IntegrityScrutinizer::new(&QaConfig::default()).unwrap();
        let mut sink = WarningSink::new();
        rule.scrutinize(record, &mut sink).unwrap();
        sink.into_warnings()
    }

    #[test]
    fn test_matched_without_subject_is_critical() {
        let warnings = run(&ResolvedRecord::new("r", None, Judgment::Matched));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, MISSING_IDENTITY);
        assert_eq!(warnings[0].severity, Severity::Critical);
        assert_eq!(warnings[0].count, 1);

        let blank = run(&ResolvedRecord::new("r", Some("  ".into()), Judgment::Matched));
        assert_eq!(blank[0].kind, MISSING_IDENTITY);
    }

    #[test]
    fn test_property_id_as_subject_is_invalid_and_confusion() {
        let warnings = run(&ResolvedRecord::new("r", Some("P31".into()), Judgment::Matched));
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].kind, INVALID_FORMAT);
        assert_eq!(warnings[0].severity, Severity::Critical);
        assert_eq!(warnings[1].kind, P_TAG_CONFUSION);
        assert_eq!(warnings[1].severity, Severity::Warning);
    }

    #[test]
    fn test_malformed_subject_is_invalid_format() {
        let warnings = run(&ResolvedRecord::new("r", Some("q90x".into()), Judgment::Matched));
        assert_eq!(warnings[0].kind, INVALID_FORMAT);
        assert_eq!(warnings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_unreconciled_record_identity_not_checked() {
        assert!(run(&ResolvedRecord::new("r", None, Judgment::Ambiguous)).is_empty());
        assert!(run(&ResolvedRecord::new("r", Some("Q90".into()), Judgment::Matched)).is_empty());
    }

    #[test]
    fn test_item_statements_checked_for_confusion() {
        let record = ResolvedRecord::new("r", Some("Q90".into()), Judgment::Matched)
            .with_statement(Statement::item("P17", "Q142"))
            .with_statement(Statement::item("P31", "P515"))
            .with_statement(Statement::item("P47", "P1"));
        let warnings = run(&record);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, P_TAG_CONFUSION);
        assert_eq!(warnings[0].count, 2);
    }
}
