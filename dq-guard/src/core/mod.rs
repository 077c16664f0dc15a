//! Core data model of the rule engine.
//!
//! ```text
//! RuleSpec ──┐
//! RuleSpec ──┼── RuleSet ──(engine)──> ValidationResult* ──> ValidationReport
//! RuleSpec ──┘                                                   │
//!                                                                └──> HistoryLog
//! ```
//!
//! Rules are declared as [`RuleSpec`]s, checked together as a [`RuleSet`],
//! run under [`RunSettings`], and produce one [`ValidationResult`] each. The
//! engine seals the results into a [`ValidationReport`] in declaration order.

pub mod report;
pub mod result;
pub mod rule;
pub mod rule_set;
pub mod settings;
pub mod severity;

pub use report::{HistoryLog, HistoryRecord, ReportSummary, RunState, ValidationReport};
pub use result::{RuleStatus, ValidationResult};
pub use rule::{RuleParams, RuleSpec};
pub use rule_set::RuleSet;
pub use settings::RunSettings;
pub use severity::Severity;
