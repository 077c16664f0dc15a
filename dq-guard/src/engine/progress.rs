//! Progress events.

use crate::core::{RuleStatus, ValidationResult};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Channel the engine reports progress on.
pub type ProgressSender = UnboundedSender<ProgressEvent>;

/// One rule finished or was skipped.
///
/// Events arrive in completion order; `index` is the rule's declaration
/// position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub index: usize,
    pub rule_name: String,
    pub status: RuleStatus,
    pub passed: bool,
    /// Results received so far, including this one
    pub completed: usize,
    pub total: usize,
}

impl ProgressEvent {
    pub(crate) fn new(
        index: usize,
        result: &ValidationResult,
        completed: usize,
        total: usize,
    ) -> Self {
        Self {
            index,
            rule_name: result.rule_name.clone(),
            status: result.status,
            passed: result.passed,
            completed,
            total,
        }
    }
}
