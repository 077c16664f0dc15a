//! Missing-value checks.

use super::sql::{count_and_sample, selection_query, Params};
use super::{Evaluation, Validator};
use crate::core::RuleSpec;
use crate::error::Result;
use crate::sources::{DataSource, Row};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

/// Flags rows where any listed column is NULL, or optionally empty or blank.
///
/// Each sampled row gains an `incomplete_fields` entry naming the columns
/// that were missing in it.
#[derive(Debug, Clone)]
pub struct CompletenessValidator {
    table: String,
    columns: Vec<String>,
    quoted: Vec<String>,
    check_empty_strings: bool,
    check_whitespace: bool,
}

impl CompletenessValidator {
    pub fn from_rule(rule: &RuleSpec) -> Result<Self> {
        let params = Params::new(rule);
        let table = params.table()?;
        let columns = params.columns()?.to_vec();
        let quoted = columns
            .iter()
            .map(|c| params.quote(c))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            table,
            columns,
            quoted,
            check_empty_strings: rule.params.check_empty_strings.unwrap_or(true),
            check_whitespace: rule.params.check_whitespace.unwrap_or(false),
        })
    }

    fn column_missing(&self, column: &str) -> String {
        let mut conditions = vec![format!("{column} IS NULL")];
        if self.check_empty_strings {
            conditions.push(format!("CAST({column} AS VARCHAR) = ''"));
        }
        if self.check_whitespace {
            conditions.push(format!("TRIM(CAST({column} AS VARCHAR)) = ''"));
        }
        format!("({})", conditions.join(" OR "))
    }

    /// Predicate matching rows with at least one missing column.
    pub fn predicate(&self) -> String {
        self.quoted
            .iter()
            .map(|c| self.column_missing(c))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    fn is_missing(&self, value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => {
                (self.check_empty_strings && s.is_empty())
                    || (self.check_whitespace && s.trim().is_empty())
            }
            Some(_) => false,
        }
    }

    fn annotate(&self, mut row: Row) -> Row {
        let missing: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| self.is_missing(row.get(c.as_str())))
            .map(String::as_str)
            .collect();
        row.insert("incomplete_fields".into(), json!(missing.join(", ")));
        row
    }
}

#[async_trait]
impl Validator for CompletenessValidator {
    fn rule_type(&self) -> &str {
        "completeness"
    }

    #[instrument(skip(self, source), fields(table = %self.table))]
    async fn evaluate(&self, source: &dyn DataSource, sample_size: usize) -> Result<Evaluation> {
        let predicate = self.predicate();
        let counted = count_and_sample(source, &self.table, &predicate, sample_size).await?;
        let samples = counted
            .samples
            .into_iter()
            .map(|row| self.annotate(row))
            .collect();

        Ok(
            Evaluation::new(counted.violation_count, selection_query(&self.table, &predicate))
                .with_samples(samples)
                .with_metadata("columns_checked", json!(self.columns))
                .with_metadata("check_empty_strings", self.check_empty_strings)
                .with_metadata("check_whitespace", self.check_whitespace),
        )
    }
}
