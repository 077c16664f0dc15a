//! Duplicate-row checks.

use super::sql::Params;
use super::{Evaluation, Validator};
use crate::core::RuleSpec;
use crate::error::{GuardError, Result};
use crate::sources::{first_count, DataSource};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

/// Largest duplicate groups reported in the metadata.
const MAX_GROUPS: usize = 10;

/// Flags rows sharing a key with an earlier row.
///
/// The violation count is the number of excess rows, the sum over duplicate
/// groups of `group_size - 1`. Sampled rows carry their group's size.
#[derive(Debug, Clone)]
pub struct DuplicatesValidator {
    rule_type: &'static str,
    table: String,
    columns: Vec<String>,
    quoted: Vec<String>,
    case_sensitive: bool,
    ignore_null: bool,
}

impl DuplicatesValidator {
    /// Duplicates over the `columns` combination.
    pub fn from_rule(rule: &RuleSpec) -> Result<Self> {
        let params = Params::new(rule);
        let columns = params.columns()?.to_vec();
        Self::build(&params, "duplicates", columns)
    }

    /// Duplicates of a single column, given as `column` or a one-entry `columns`.
    pub fn uniqueness_from_rule(rule: &RuleSpec) -> Result<Self> {
        let params = Params::new(rule);
        let column = match (&rule.params.column, &rule.params.columns) {
            (Some(_), _) => params.column()?.to_string(),
            (None, Some(columns)) if columns.len() == 1 => columns[0].clone(),
            (None, Some(_)) => {
                return Err(params.error("uniqueness checks exactly one column"));
            }
            (None, None) => params.column()?.to_string(),
        };
        Self::build(&params, "uniqueness", vec![column])
    }

    fn build(params: &Params<'_>, rule_type: &'static str, columns: Vec<String>) -> Result<Self> {
        let table = params.table()?;
        let quoted = columns
            .iter()
            .map(|c| params.quote(c))
            .collect::<Result<Vec<_>>>()?;
        let rule = params.rule();
        Ok(Self {
            rule_type,
            table,
            columns,
            quoted,
            case_sensitive: rule.params.case_sensitive.unwrap_or(true),
            ignore_null: rule.params.ignore_null.unwrap_or(true),
        })
    }

    fn key(&self, column: &str) -> String {
        if self.case_sensitive {
            column.to_string()
        } else {
            format!("LOWER(CAST({column} AS VARCHAR))")
        }
    }

    fn where_clause(&self) -> String {
        if !self.ignore_null {
            return String::new();
        }
        let checks: Vec<String> = self
            .quoted
            .iter()
            .map(|c| format!("{c} IS NOT NULL"))
            .collect();
        format!(" WHERE {}", checks.join(" AND "))
    }

    fn group_by(&self) -> String {
        self.quoted
            .iter()
            .map(|c| self.key(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Duplicate groups keyed by the original column names.
    pub fn groups_query(&self) -> String {
        let keys: Vec<String> = self
            .quoted
            .iter()
            .map(|c| {
                if self.case_sensitive {
                    c.clone()
                } else {
                    format!("{} AS {c}", self.key(c))
                }
            })
            .collect();
        format!(
            "SELECT {}, COUNT(*) AS group_size FROM {}{} GROUP BY {} HAVING COUNT(*) > 1",
            keys.join(", "),
            self.table,
            self.where_clause(),
            self.group_by()
        )
    }

    fn sample_query(&self, sample_size: usize) -> String {
        let keys: Vec<String> = self
            .quoted
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} AS _k{i}", self.key(c)))
            .collect();
        let groups = format!(
            "SELECT {}, COUNT(*) AS group_size FROM {}{} GROUP BY {} HAVING COUNT(*) > 1",
            keys.join(", "),
            self.table,
            self.where_clause(),
            self.group_by()
        );
        let equals = if self.ignore_null {
            "="
        } else {
            "IS NOT DISTINCT FROM"
        };
        let join: Vec<String> = self
            .quoted
            .iter()
            .enumerate()
            .map(|(i, c)| format!("({} {equals} dg._k{i})", self.key(&format!("t.{c}"))))
            .collect();
        format!(
            "SELECT t.*, dg.group_size FROM {} t INNER JOIN ({groups}) dg ON {} ORDER BY t.{} LIMIT {sample_size}",
            self.table,
            join.join(" AND "),
            self.quoted[0]
        )
    }
}

#[async_trait]
impl Validator for DuplicatesValidator {
    fn rule_type(&self) -> &str {
        self.rule_type
    }

    #[instrument(skip(self, source), fields(table = %self.table, columns = ?self.columns))]
    async fn evaluate(&self, source: &dyn DataSource, sample_size: usize) -> Result<Evaluation> {
        let groups = self.groups_query();
        let count_sql = format!(
            "SELECT COUNT(*) AS group_count, COALESCE(SUM(group_size - 1), 0) AS violation_count FROM ({groups}) AS dups"
        );
        let rows = source.execute_query(&count_sql).await?;
        let violation_count = first_count(&rows, "violation_count").ok_or_else(|| {
            GuardError::query_execution(&count_sql, "count query returned no count column")
        })?;
        let group_count = first_count(&rows, "group_count").unwrap_or(0);

        let mut samples = Vec::new();
        let mut top_groups = Vec::new();
        if violation_count > 0 {
            let ordered = format!(
                "SELECT * FROM ({groups}) AS g ORDER BY group_size DESC, {} LIMIT {MAX_GROUPS}",
                self.quoted.join(", ")
            );
            top_groups = source
                .execute_query(&ordered)
                .await?
                .into_iter()
                .map(Value::Object)
                .collect();
            if sample_size > 0 {
                samples = source.execute_query(&self.sample_query(sample_size)).await?;
            }
        }

        Ok(Evaluation::new(violation_count, groups)
            .with_samples(samples)
            .with_metadata("columns_checked", json!(self.columns))
            .with_metadata("case_sensitive", self.case_sensitive)
            .with_metadata("ignore_null", self.ignore_null)
            .with_metadata("duplicate_groups", Value::Array(top_groups))
            .with_metadata("group_count", group_count))
    }
}
