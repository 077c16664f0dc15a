//! Foreign-key checks between two tables.

use super::sql::Params;
use super::{Evaluation, Validator};
use crate::core::RuleSpec;
use crate::error::{GuardError, Result};
use crate::sources::{first_count, DataSource};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

/// Distinct orphan values reported in the metadata.
const MAX_ORPHAN_VALUES: usize = 20;

/// Flags rows whose key has no match in the reference table.
///
/// The check is a left anti-join. With `allow_null` (the default) NULL keys
/// are not orphans.
#[derive(Debug, Clone)]
pub struct ReferentialIntegrityValidator {
    table: String,
    column: String,
    reference_table: String,
    reference_column: String,
    source_names: (String, String),
    reference_names: (String, String),
    allow_null: bool,
}

impl ReferentialIntegrityValidator {
    pub fn from_rule(rule: &RuleSpec) -> Result<Self> {
        let params = Params::new(rule);
        let table = params.table()?;
        let column = params.column()?;
        let reference_table =
            params.required("reference_table", &rule.params.reference_table)?;
        let reference_column =
            params.required("reference_column", &rule.params.reference_column)?;

        Ok(Self {
            table,
            column: params.quote(column)?,
            reference_table: params.quote(reference_table)?,
            reference_column: params.quote(reference_column)?,
            source_names: (
                rule.table.clone().unwrap_or_default(),
                column.to_string(),
            ),
            reference_names: (reference_table.to_string(), reference_column.to_string()),
            allow_null: rule.params.allow_null.unwrap_or(true),
        })
    }

    fn from_clause(&self) -> String {
        let mut clause = format!(
            "FROM {} t LEFT JOIN {} r ON t.{} = r.{} WHERE r.{} IS NULL",
            self.table,
            self.reference_table,
            self.column,
            self.reference_column,
            self.reference_column
        );
        if self.allow_null {
            clause.push_str(&format!(" AND t.{} IS NOT NULL", self.column));
        }
        clause
    }
}

#[async_trait]
impl Validator for ReferentialIntegrityValidator {
    fn rule_type(&self) -> &str {
        "referential_integrity"
    }

    #[instrument(
        skip(self, source),
        fields(table = %self.table, reference = %self.reference_table)
    )]
    async fn evaluate(&self, source: &dyn DataSource, sample_size: usize) -> Result<Evaluation> {
        let from = self.from_clause();
        let selection = format!("SELECT t.* {from}");

        let count_sql = format!("SELECT COUNT(*) AS violation_count {from}");
        let rows = source.execute_query(&count_sql).await?;
        let violation_count = first_count(&rows, "violation_count").ok_or_else(|| {
            GuardError::query_execution(&count_sql, "count query returned no count column")
        })?;

        let mut samples = Vec::new();
        let mut orphan_values = Vec::new();
        if violation_count > 0 {
            if sample_size > 0 {
                samples = source
                    .execute_query(&format!("{selection} LIMIT {sample_size}"))
                    .await?;
            }
            let orphans = format!(
                "SELECT DISTINCT t.{} AS orphan_value {from} ORDER BY orphan_value LIMIT {MAX_ORPHAN_VALUES}",
                self.column
            );
            orphan_values = source
                .execute_query(&orphans)
                .await?
                .into_iter()
                .map(|mut row| row.remove("orphan_value").unwrap_or(Value::Null))
                .collect();
            debug!(orphans = orphan_values.len(), "Collected orphan values");
        }

        Ok(Evaluation::new(violation_count, selection)
            .with_samples(samples)
            .with_metadata("source_table", json!(self.source_names.0))
            .with_metadata("source_column", json!(self.source_names.1))
            .with_metadata("reference_table", json!(self.reference_names.0))
            .with_metadata("reference_column", json!(self.reference_names.1))
            .with_metadata("orphan_values", Value::Array(orphan_values))
            .with_metadata("allow_null", self.allow_null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;
    use crate::test_helpers::customers_and_orders;

    fn rule() -> RuleSpec {
        RuleSpec::new("orders_valid_customer", "referential_integrity", Severity::Critical)
            .on_table("orders")
            .column("customer_id")
            .reference("customers", "id")
    }

    #[tokio::test]
    async fn test_orphans_are_counted_and_listed() {
        let source = customers_and_orders();
        let validator = ReferentialIntegrityValidator::from_rule(&rule()).unwrap();
        let evaluation = validator.evaluate(&source, 5).await.unwrap();

        // orders 104 and 105 reference customer 99; order 106 has no customer
        assert_eq!(evaluation.violation_count, 2);
        assert_eq!(evaluation.sample_records.len(), 2);
        assert_eq!(evaluation.metadata["orphan_values"], json!([99]));
        assert_eq!(evaluation.metadata["reference_table"], json!("customers"));
        assert!(evaluation.query.unwrap().contains("LEFT JOIN \"customers\" r"));
    }

    #[tokio::test]
    async fn test_null_keys_are_orphans_when_not_allowed() {
        let source = customers_and_orders();
        let rule = rule().with_params(|p| p.allow_null = Some(false));
        let validator = ReferentialIntegrityValidator::from_rule(&rule).unwrap();
        let evaluation = validator.evaluate(&source, 5).await.unwrap();

        assert_eq!(evaluation.violation_count, 3);
        let orphans = evaluation.metadata["orphan_values"].as_array().unwrap();
        assert_eq!(orphans.len(), 2);
        assert!(orphans.contains(&json!(99)));
        assert!(orphans.contains(&Value::Null));
    }

    #[tokio::test]
    async fn test_no_orphans() {
        let source = customers_and_orders();
        let rule = RuleSpec::new("self_ref", "referential_integrity", Severity::Low)
            .on_table("customers")
            .column("id")
            .reference("customers", "id");
        let evaluation = ReferentialIntegrityValidator::from_rule(&rule)
            .unwrap()
            .evaluate(&source, 5)
            .await
            .unwrap();
        assert_eq!(evaluation.violation_count, 0);
        assert_eq!(evaluation.metadata["orphan_values"], json!([]));
    }

    #[test]
    fn test_requires_reference() {
        let rule = RuleSpec::new("r", "referential_integrity", Severity::Low)
            .on_table("orders")
            .column("customer_id");
        let err = ReferentialIntegrityValidator::from_rule(&rule).unwrap_err();
        assert!(err.to_string().contains("reference_table"));
    }
}
