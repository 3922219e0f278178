//! kgrecon QA gate
//!
//! Blocks unsafe output before it leaves the system:
//!
//! ```text
//! records ──► UpdateScheduler ──► for each record, dependencies first
//!                  │                   ├─ IntegrityScrutinizer
//!                  │                   ├─ ConstraintScrutinizer
//!                  │                   └─ (registered rules...)
//!                  │                           │
//!                  ▼                           ▼
//!       scheduler-error (Critical)      WarningSink (merge by type)
//!                                              │
//!                                              ▼
//!                          Vec<QaWarning> ──► is_blocking / ExportPolicy
//! ```
//!
//! Severity semantics:
//!
//! - **Critical** always blocks export.
//! - **Error** is visible and blocks only when the export policy is strict.
//! - **Warning** never blocks.

pub mod config;
pub mod error;
pub mod gate;
pub mod record;
pub mod rules;
pub mod scheduler;
pub mod warning;

pub use config::QaConfig;
pub use error::{GateError, QaError, RuleError, SchedulingError};
pub use gate::{ExportPolicy, ScrutinizerGate, SCHEDULER_ERROR};
pub use record::{ResolvedRecord, Statement, StatementValue};
pub use rules::{ConstraintScrutinizer, IntegrityScrutinizer, Scrutinizer};
pub use scheduler::UpdateScheduler;
pub use warning::{QaWarning, Severity, WarningSink};
