//! Caller-supplied violation queries.

use super::sql::Params;
use super::{Evaluation, Validator};
use crate::core::RuleSpec;
use crate::error::{GuardError, Result};
use crate::security::SqlSecurity;
use crate::sources::{value_as_u64, DataSource, Row};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Column names tried, in order, when reading a caller's count query.
const COUNT_COLUMNS: &[&str] = &["violation_count", "count", "cnt", "total"];

/// Runs a read-only query whose result rows are the violations.
///
/// The rule passes when the query returns no rows. Counting wraps the query
/// in `SELECT COUNT(*)` unless a separate `count_query` is given; when the
/// backend cannot wrap it, the query is run verbatim and counted locally.
#[derive(Debug, Clone)]
pub struct CustomSqlValidator {
    query: String,
    count_query: Option<String>,
}

impl CustomSqlValidator {
    pub fn from_rule(rule: &RuleSpec) -> Result<Self> {
        let params = Params::new(rule);
        let query = params.required("query", &rule.params.query)?;
        let query =
            SqlSecurity::validate_read_only_query(query).map_err(|e| params.error(e.to_string()))?;
        let count_query = rule
            .params
            .count_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .map(|q| {
                SqlSecurity::validate_read_only_query(q)
                    .map_err(|e| params.error(format!("count_query: {e}")))
            })
            .transpose()?;
        Ok(Self { query, count_query })
    }

    fn wrapped(&self, select: &str, suffix: &str) -> String {
        format!("SELECT {select} FROM (\n{}\n) AS violations{suffix}", self.query)
    }

    async fn run_verbatim(
        &self,
        source: &dyn DataSource,
        sample_size: usize,
    ) -> Result<(u64, Vec<Row>)> {
        let mut rows = source.execute_query(&self.query).await?;
        let count = rows.len() as u64;
        rows.truncate(sample_size);
        Ok((count, rows))
    }
}

/// Reads a count from the first row of a count query's result.
pub(crate) fn extract_count(rows: &[Row]) -> Option<u64> {
    let Some(row) = rows.first() else {
        return Some(0);
    };
    for key in COUNT_COLUMNS {
        if let Some(value) = row.get(*key) {
            return value_as_u64(value);
        }
    }
    if row.len() == 1 {
        return row.values().next().and_then(value_as_u64);
    }
    None
}

#[async_trait]
impl Validator for CustomSqlValidator {
    fn rule_type(&self) -> &str {
        "custom_sql"
    }

    #[instrument(skip(self, source))]
    async fn evaluate(&self, source: &dyn DataSource, sample_size: usize) -> Result<Evaluation> {
        let mut samples = None;
        let violation_count = match &self.count_query {
            Some(count_query) => {
                let rows = source.execute_query(count_query).await?;
                extract_count(&rows).ok_or_else(|| {
                    GuardError::query_execution(
                        count_query,
                        "count_query must return a single count column",
                    )
                })?
            }
            None => {
                let count_sql = self.wrapped("COUNT(*) AS violation_count", "");
                match source.execute_query(&count_sql).await {
                    Ok(rows) => extract_count(&rows).ok_or_else(|| {
                        GuardError::query_execution(
                            &count_sql,
                            "count query returned no count column",
                        )
                    })?,
                    Err(e) if e.is_connection() => return Err(e),
                    Err(e) => {
                        debug!(error = %e, "Query cannot be wrapped, counting locally");
                        let (count, rows) = self.run_verbatim(source, sample_size).await?;
                        samples = Some(rows);
                        count
                    }
                }
            }
        };

        let samples = match samples {
            Some(rows) => rows,
            None if violation_count > 0 && sample_size > 0 => {
                let sample_sql = self.wrapped("*", &format!(" LIMIT {sample_size}"));
                match source.execute_query(&sample_sql).await {
                    Ok(rows) => rows,
                    Err(e) if e.is_connection() => return Err(e),
                    Err(_) => self.run_verbatim(source, sample_size).await?.1,
                }
            }
            None => Vec::new(),
        };

        Ok(Evaluation::new(violation_count, self.query.clone())
            .with_samples(samples)
            .with_metadata("custom_query", true)
            .with_metadata("has_count_query", self.count_query.is_some()))
    }
}
