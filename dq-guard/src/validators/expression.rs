//! Row-level boolean expressions over one or more columns.

use super::sql::{count_and_sample, selection_query, Params};
use super::{Evaluation, Validator};
use crate::core::RuleSpec;
use crate::error::Result;
use crate::security::SqlSecurity;
use crate::sources::DataSource;
use async_trait::async_trait;
use serde_json::json;
use tracing::instrument;

const OPERATORS: &[&str] = &["=", "!=", "<>", "<", "<=", ">", ">="];

/// Flags rows for which a boolean expression is false.
///
/// The expression is either given verbatim (`expression`) or assembled from
/// `column`, `operator` and `other_column`. Rows where the expression
/// evaluates to NULL are not violations.
#[derive(Debug, Clone)]
pub struct CrossFieldValidator {
    table: String,
    expression: String,
}

impl CrossFieldValidator {
    pub fn from_rule(rule: &RuleSpec) -> Result<Self> {
        let params = Params::new(rule);
        let table = params.table()?;
        let p = &rule.params;

        let expression = match (p.expression.as_deref(), p.operator.as_deref()) {
            (Some(expression), _) if !expression.trim().is_empty() => {
                SqlSecurity::validate_sql_expression(expression)
                    .map_err(|e| params.error(e.to_string()))?;
                expression.trim().to_string()
            }
            (_, Some(operator)) => {
                let operator = operator.trim();
                if !OPERATORS.contains(&operator) {
                    return Err(params.error(format!(
                        "unsupported operator '{operator}' (expected one of {})",
                        OPERATORS.join(" ")
                    )));
                }
                let left = params.quote(params.column()?)?;
                let right = params.quote(params.required("other_column", &p.other_column)?)?;
                format!("{left} {operator} {right}")
            }
            _ => {
                return Err(params.error(
                    "cross_field requires 'expression' or 'column', 'operator' and 'other_column'",
                ))
            }
        };

        Ok(Self { table, expression })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

#[async_trait]
impl Validator for CrossFieldValidator {
    fn rule_type(&self) -> &str {
        "cross_field"
    }

    #[instrument(skip(self, source), fields(table = %self.table))]
    async fn evaluate(&self, source: &dyn DataSource, sample_size: usize) -> Result<Evaluation> {
        let predicate = format!("NOT ({})", self.expression);
        let counted = count_and_sample(source, &self.table, &predicate, sample_size).await?;
        Ok(
            Evaluation::new(counted.violation_count, selection_query(&self.table, &predicate))
                .with_samples(counted.samples)
                .with_metadata("expression", json!(self.expression)),
        )
    }
}
