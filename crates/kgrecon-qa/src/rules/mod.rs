//! Rule checks run by the gate.
//!
//! A scrutinizer looks at one record at a time and reports into the pass's
//! [`WarningSink`]. Rules are independent of each other and of their
//! registration order.

pub mod constraint;
pub mod integrity;

pub use constraint::ConstraintScrutinizer;
pub use integrity::IntegrityScrutinizer;

use crate::error::RuleError;
use crate::record::ResolvedRecord;
use crate::warning::WarningSink;

pub trait Scrutinizer: Send + Sync {
    fn name(&self) -> &str;

    /// Emit zero or more warnings for `record`. An `Err` aborts the pass.
    fn scrutinize(&self, record: &ResolvedRecord, sink: &mut WarningSink) -> Result<(), RuleError>;
}
