//! Per-rule validation results.

use super::{RuleSpec, Severity};
use crate::sources::Row;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Outcome category of a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    /// The rule was evaluated; `passed` tells whether violations were found
    Ok,
    /// The rule was never started because a critical rule failed first
    Skipped,
    /// The rule could not be evaluated
    Error,
    /// The outlier analyzer had too little data or spread to decide
    InsufficientData,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Ok => "ok",
            RuleStatus::Skipped => "skipped",
            RuleStatus::Error => "error",
            RuleStatus::InsufficientData => "insufficient_data",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of evaluating (or skipping) one rule.
///
/// A result is created exactly once per declared rule and is not modified
/// after it reaches the aggregator.
///
/// For evaluated rules (`ok` and `insufficient_data`) `passed` is true
/// exactly when `violation_count` is zero. `error` and `skipped` results are
/// never passing and carry a zero count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub rule_name: String,
    pub rule_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub passed: bool,
    pub violation_count: u64,
    /// At most `sample_size` violating rows, in the query's row order
    #[serde(default)]
    pub sample_records: Vec<Row>,
    /// The check query that was executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Present iff the rule could not be evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    pub status: RuleStatus,
    /// Validator-specific details (bounds, orphan values, duplicate groups)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ValidationResult {
    /// A passing, empty result for `rule`; evaluators fill in the rest.
    pub(crate) fn for_rule(rule: &RuleSpec, status: RuleStatus) -> Self {
        Self {
            rule_name: rule.name().to_string(),
            rule_type: rule.rule_type.clone(),
            table: rule.table.clone(),
            severity: rule.severity,
            description: rule.description.clone(),
            passed: matches!(status, RuleStatus::Ok | RuleStatus::InsufficientData),
            violation_count: 0,
            sample_records: Vec::new(),
            query: None,
            error_message: None,
            duration: Duration::ZERO,
            status,
            metadata: Map::new(),
        }
    }

    /// A result for a rule that was never started.
    pub fn skipped(rule: &RuleSpec) -> Self {
        Self::for_rule(rule, RuleStatus::Skipped)
    }

    /// A result for a rule that could not be evaluated.
    pub fn error(
        rule: &RuleSpec,
        message: impl Into<String>,
        query: Option<String>,
        duration: Duration,
    ) -> Self {
        Self {
            query,
            error_message: Some(message.into()),
            duration,
            ..Self::for_rule(rule, RuleStatus::Error)
        }
    }

    /// Returns true if this result counts as a failure in the summary.
    pub fn is_failure(&self) -> bool {
        !self.passed && self.status != RuleStatus::Skipped
    }

    /// Returns true if this is a failing critical rule.
    pub fn is_critical_failure(&self) -> bool {
        self.severity == Severity::Critical && self.is_failure()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_micros() as f64 / 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Ok(Duration::from_micros((millis.max(0.0) * 1000.0).round() as u64))
    }
}
