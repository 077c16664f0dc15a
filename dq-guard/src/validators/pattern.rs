//! Format checks with regular expressions.

use super::sql::{count_and_sample, selection_query, Params};
use super::{Evaluation, Validator};
use crate::core::RuleSpec;
use crate::error::Result;
use crate::security::SqlSecurity;
use crate::sources::DataSource;
use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;

/// Patterns that can be referenced by name instead of spelled out.
pub const NAMED_PATTERNS: &[(&str, &str)] = &[
    ("email", r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$"),
    ("us_phone", r"^\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}$"),
    ("us_zip", r"^[0-9]{5}(-[0-9]{4})?$"),
    ("ca_postal", r"^[A-Za-z][0-9][A-Za-z][ -]?[0-9][A-Za-z][0-9]$"),
    ("ssn", r"^[0-9]{3}-?[0-9]{2}-?[0-9]{4}$"),
    ("url", r"^https?://[^\s/$.?#].[^\s]*$"),
    ("ipv4", r"^([0-9]{1,3}\.){3}[0-9]{1,3}$"),
    ("date_iso", r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$"),
    (
        "uuid",
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
    ),
];

/// Looks up a named pattern.
///
/// ```rust
/// use dq_guard::validators::named_pattern;
///
/// assert!(named_pattern("us_zip").is_some());
/// assert!(named_pattern("^[0-9]+$").is_none());
/// ```
pub fn named_pattern(name: &str) -> Option<&'static str> {
    NAMED_PATTERNS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, pattern)| *pattern)
}

/// Flags non-NULL values that do not match `pattern`, or that do match it
/// when `inverse` is set. NULLs are left to completeness checks.
#[derive(Debug, Clone)]
pub struct PatternValidator {
    table: String,
    column: String,
    pattern: String,
    pattern_name: Option<String>,
    escaped: String,
    inverse: bool,
}

impl PatternValidator {
    pub fn from_rule(rule: &RuleSpec) -> Result<Self> {
        let params = Params::new(rule);
        let table = params.table()?;
        let column = params.quote(params.column()?)?;
        let given = params.required("pattern", &rule.params.pattern)?;

        let (pattern, pattern_name) = match named_pattern(given) {
            Some(pattern) => (pattern.to_string(), Some(given.to_string())),
            None => (given.to_string(), None),
        };
        let escaped = SqlSecurity::validate_regex_pattern(&pattern)
            .map_err(|e| params.error(e.to_string()))?;

        Ok(Self {
            table,
            column,
            pattern,
            pattern_name,
            escaped,
            inverse: rule.params.inverse.unwrap_or(false),
        })
    }

    /// Predicate matching violating values.
    pub fn predicate(&self) -> String {
        let matches = format!(
            "regexp_like(CAST({} AS VARCHAR), '{}')",
            self.column, self.escaped
        );
        if self.inverse {
            format!("{} IS NOT NULL AND {matches}", self.column)
        } else {
            format!("{} IS NOT NULL AND NOT {matches}", self.column)
        }
    }
}

#[async_trait]
impl Validator for PatternValidator {
    fn rule_type(&self) -> &str {
        "pattern"
    }

    #[instrument(skip(self, source), fields(table = %self.table, column = %self.column))]
    async fn evaluate(&self, source: &dyn DataSource, sample_size: usize) -> Result<Evaluation> {
        let predicate = self.predicate();
        let counted = count_and_sample(source, &self.table, &predicate, sample_size).await?;

        let mut evaluation =
            Evaluation::new(counted.violation_count, selection_query(&self.table, &predicate))
                .with_samples(counted.samples)
                .with_metadata("pattern", json!(self.pattern))
                .with_metadata("inverse", self.inverse);
        if let Some(name) = &self.pattern_name {
            evaluation = evaluation.with_metadata("pattern_name", json!(name));
        }
        Ok(evaluation)
    }
}
