//! Declarative rule specifications.

use super::Severity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A declarative specification of one data-quality check.
///
/// Rules are plain data: the validator kind is named by `rule_type` (the
/// `type` key in configuration) and its parameters live in [`RuleParams`].
/// Whether the parameters fit the kind is decided by the validator when the
/// rule is evaluated, so a malformed rule fails on its own without aborting
/// the run.
///
/// # Examples
///
/// ```rust
/// use dq_guard::core::{RuleSpec, Severity};
///
/// let rule = RuleSpec::new("orders_valid_customer", "referential_integrity", Severity::Critical)
///     .on_table("orders")
///     .column("customer_id")
///     .reference("customers", "id");
///
/// assert_eq!(rule.table.as_deref(), Some("orders"));
/// assert_eq!(rule.params.reference_table.as_deref(), Some("customers"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Unique name within a run; derived from type and table when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Validator kind, e.g. `completeness` or `outliers`
    #[serde(rename = "type")]
    pub rule_type: String,
    /// Table the rule inspects (not required by `custom_sql`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Severity of a failure
    #[serde(default)]
    pub severity: Severity,
    /// Human-readable explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Per-rule override of the run's sample size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<usize>,
    /// Type-specific parameters
    #[serde(flatten)]
    pub params: RuleParams,
}

/// Type-specific rule parameters.
///
/// Every field is optional at this level; each validator documents which ones
/// it requires. Keys that no built-in validator understands are preserved in
/// `extra` for validators registered by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    // completeness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_empty_strings: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_whitespace: Option<bool>,

    // referential_integrity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_null: Option<bool>,

    // duplicates / uniqueness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_null: Option<bool>,

    // range / date_range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive: Option<bool>,

    // pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<bool>,

    // cross_field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_column: Option<String>,

    // outliers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,

    // custom_sql
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_query: Option<String>,

    /// Parameters not understood by the built-in validators
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RuleSpec {
    /// Creates a named rule of the given kind.
    pub fn new(name: impl Into<String>, rule_type: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: Some(name.into()),
            rule_type: rule_type.into(),
            table: None,
            severity,
            description: None,
            sample_size: None,
            params: RuleParams::default(),
        }
    }

    /// Creates a rule without a name; one is derived when the rule set is built.
    pub fn unnamed(rule_type: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: None,
            ..Self::new("", rule_type, severity)
        }
    }

    /// The rule's name, or an empty string before the rule set assigned one.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// The table the rule inspects, or an empty string.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or_default()
    }

    /// Sets the table.
    pub fn on_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Sets the description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Overrides the run-level sample size for this rule.
    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = Some(sample_size);
        self
    }

    /// Sets the single column the rule inspects.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.params.column = Some(column.into());
        self
    }

    /// Sets the columns the rule inspects.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the referenced table and column for referential integrity.
    pub fn reference(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.params.reference_table = Some(table.into());
        self.params.reference_column = Some(column.into());
        self
    }

    /// Sets the lower range bound.
    pub fn min(mut self, min: impl Into<Value>) -> Self {
        self.params.min = Some(min.into());
        self
    }

    /// Sets the upper range bound.
    pub fn max(mut self, max: impl Into<Value>) -> Self {
        self.params.max = Some(max.into());
        self
    }

    /// Sets the regex (or named) pattern.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.params.pattern = Some(pattern.into());
        self
    }

    /// Sets a boolean SQL expression every row must satisfy.
    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.params.expression = Some(expression.into());
        self
    }

    /// Sets the outlier detection method (`zscore` or `iqr`).
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.params.method = Some(method.into());
        self
    }

    /// Sets the z-score threshold.
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.params.threshold = Some(threshold);
        self
    }

    /// Sets the verbatim check query for `custom_sql`.
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.params.query = Some(query.into());
        self
    }

    /// Sets the optional counting query for `custom_sql`.
    pub fn count_query(mut self, query: impl Into<String>) -> Self {
        self.params.count_query = Some(query.into());
        self
    }

    /// Adjusts any other parameter in place.
    pub fn with_params(mut self, f: impl FnOnce(&mut RuleParams)) -> Self {
        f(&mut self.params);
        self
    }
}
