use crate::config::QaConfig;
use crate::error::{GateError, QaError};
use crate::record::ResolvedRecord;
use crate::rules::{ConstraintScrutinizer, IntegrityScrutinizer, Scrutinizer};
use crate::scheduler::UpdateScheduler;
use crate::warning::{QaWarning, Severity, WarningSink};
use tracing::{debug, warn};

pub const SCHEDULER_ERROR: &str = "scheduler-error";

/// Runs the registered scrutinizer chain over a batch of resolved records.
pub struct ScrutinizerGate {
    scrutinizers: Vec<Box<dyn Scrutinizer>>,
    scheduler: UpdateScheduler,
}

impl Default for ScrutinizerGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrutinizerGate {
    /// An empty gate with no rules registered.
    pub fn new() -> Self {
        Self {
            scrutinizers: Vec::new(),
            scheduler: UpdateScheduler,
        }
    }

    /// Gate with the integrity and constraint rules registered.
    pub fn with_default_rules(config: &QaConfig) -> Result<Self, QaError> {
        let mut gate = Self::new();
        gate.register(Box::new(IntegrityScrutinizer::new(config)?));
        gate.register(Box::new(ConstraintScrutinizer::new(config)?));
        Ok(gate)
    }

    pub fn register(&mut self, scrutinizer: Box<dyn Scrutinizer>) {
        self.scrutinizers.push(scrutinizer);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.scrutinizers.iter().map(|s| s.name()).collect()
    }

    /// One validation pass. Warnings are merged by type in first-seen order.
    ///
    /// An unresolvable record order yields a single Critical
    /// [`SCHEDULER_ERROR`] warning. A rule that fails internally is an `Err`,
    /// never an empty warning list.
    pub fn validate(&self, records: &[ResolvedRecord]) -> Result<Vec<QaWarning>, GateError> {
        let order = match self.scheduler.schedule(records) {
            Ok(order) => order,
            Err(err) => {
                warn!(error = %err, records = records.len(), "record scheduling failed");
                return Ok(vec![QaWarning::new(SCHEDULER_ERROR, Severity::Critical, 1)
                    .with_sender("Update Scheduler")
                    .with_message_key("qa.scheduler.impossible_order")]);
            }
        };

        let mut sink = WarningSink::new();
        for idx in order {
            let record = &records[idx];
            for rule in &self.scrutinizers {
                rule.scrutinize(record, &mut sink)?;
            }
        }
        debug!(records = records.len(), warning_types = sink.len(), "validation pass complete");
        Ok(sink.into_warnings())
    }

    /// True iff any warning is Critical.
    pub fn is_blocking(warnings: &[QaWarning]) -> bool {
        warnings.iter().any(|w| w.severity == Severity::Critical)
    }
}

/// Export decision layered on top of the gate's Critical-only blocking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportPolicy {
    /// Also block on Error-severity warnings.
    pub strict: bool,
}

impl ExportPolicy {
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn blocks(&self, warnings: &[QaWarning]) -> bool {
        let floor = if self.strict {
            Severity::Error
        } else {
            Severity::Critical
        };
        warnings.iter().any(|w| w.severity >= floor)
    }
}
