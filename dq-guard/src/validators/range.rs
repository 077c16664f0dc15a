//! Value and date range checks.

use super::sql::{count_and_sample, selection_query, sql_literal, Params};
use super::{Evaluation, Validator};
use crate::core::RuleSpec;
use crate::error::Result;
use crate::security::SqlSecurity;
use crate::sources::DataSource;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{json, Value};
use tracing::instrument;

/// Flags non-NULL values outside `[min, max]`.
///
/// With `inclusive` (the default) the bounds themselves are valid; otherwise
/// a value equal to a bound is a violation. `date_range` rules take their
/// bounds from `min_date`/`max_date`, which must be ISO dates or timestamps.
#[derive(Debug, Clone)]
pub struct RangeValidator {
    rule_type: &'static str,
    table: String,
    column: String,
    column_name: String,
    min: Option<Value>,
    max: Option<Value>,
    min_sql: Option<String>,
    max_sql: Option<String>,
    inclusive: bool,
}

impl RangeValidator {
    /// Numeric (or otherwise comparable) bounds from `min`/`max`.
    pub fn from_rule(rule: &RuleSpec) -> Result<Self> {
        let params = Params::new(rule);
        let min = rule.params.min.clone().filter(|v| !v.is_null());
        let max = rule.params.max.clone().filter(|v| !v.is_null());
        if min.is_none() && max.is_none() {
            return Err(params.error("range requires at least one of 'min' or 'max'"));
        }

        let literal = |name: &str, value: &Option<Value>| -> Result<Option<String>> {
            value
                .as_ref()
                .map(|v| {
                    sql_literal(v).ok_or_else(|| {
                        params.error(format!("'{name}' must be a number or a string, got {v}"))
                    })
                })
                .transpose()
        };
        let min_sql = literal("min", &min)?;
        let max_sql = literal("max", &max)?;

        if let (Some(lo), Some(hi)) = (
            min.as_ref().and_then(Value::as_f64),
            max.as_ref().and_then(Value::as_f64),
        ) {
            if lo > hi {
                return Err(params.error(format!("'min' ({lo}) is greater than 'max' ({hi})")));
            }
        }

        Self::build(&params, "range", min, max, min_sql, max_sql)
    }

    /// Date bounds from `min_date`/`max_date`.
    pub fn dates_from_rule(rule: &RuleSpec) -> Result<Self> {
        let params = Params::new(rule);
        let min_date = rule.params.min_date.as_deref().filter(|d| !d.trim().is_empty());
        let max_date = rule.params.max_date.as_deref().filter(|d| !d.trim().is_empty());
        if min_date.is_none() && max_date.is_none() {
            return Err(params.error("date_range requires at least one of 'min_date' or 'max_date'"));
        }

        let parsed = |name: &str, value: Option<&str>| -> Result<Option<NaiveDateTime>> {
            value
                .map(|v| {
                    parse_date(v).ok_or_else(|| {
                        params.error(format!("'{name}' is not an ISO date or timestamp: '{v}'"))
                    })
                })
                .transpose()
        };
        let bounds = (parsed("min_date", min_date)?, parsed("max_date", max_date)?);
        if let (Some(lo), Some(hi)) = bounds {
            if lo > hi {
                return Err(params.error("'min_date' is after 'max_date'"));
            }
        }

        Self::build(
            &params,
            "date_range",
            min_date.map(|d| json!(d.trim())),
            max_date.map(|d| json!(d.trim())),
            min_date.map(|d| SqlSecurity::escape_literal(d.trim())),
            max_date.map(|d| SqlSecurity::escape_literal(d.trim())),
        )
    }

    fn build(
        params: &Params<'_>,
        rule_type: &'static str,
        min: Option<Value>,
        max: Option<Value>,
        min_sql: Option<String>,
        max_sql: Option<String>,
    ) -> Result<Self> {
        let column_name = params.column()?.to_string();
        Ok(Self {
            rule_type,
            table: params.table()?,
            column: params.quote(&column_name)?,
            column_name,
            min,
            max,
            min_sql,
            max_sql,
            inclusive: params.rule().params.inclusive.unwrap_or(true),
        })
    }

    /// Predicate matching non-NULL values outside the range.
    pub fn predicate(&self) -> String {
        let (below, above) = if self.inclusive { ("<", ">") } else { ("<=", ">=") };
        let mut sides = Vec::with_capacity(2);
        if let Some(min) = &self.min_sql {
            sides.push(format!("{} {below} {min}", self.column));
        }
        if let Some(max) = &self.max_sql {
            sides.push(format!("{} {above} {max}", self.column));
        }
        format!("{} IS NOT NULL AND ({})", self.column, sides.join(" OR "))
    }
}

fn parse_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.naive_utc());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

#[async_trait]
impl Validator for RangeValidator {
    fn rule_type(&self) -> &str {
        self.rule_type
    }

    #[instrument(skip(self, source), fields(table = %self.table, column = %self.column))]
    async fn evaluate(&self, source: &dyn DataSource, sample_size: usize) -> Result<Evaluation> {
        let predicate = self.predicate();
        let counted = count_and_sample(source, &self.table, &predicate, sample_size).await?;

        let (min_key, max_key) = match self.rule_type {
            "date_range" => ("min_date", "max_date"),
            _ => ("min", "max"),
        };
        Ok(
            Evaluation::new(counted.violation_count, selection_query(&self.table, &predicate))
                .with_samples(counted.samples)
                .with_metadata("column", json!(self.column_name))
                .with_metadata(min_key, self.min.clone().unwrap_or(Value::Null))
                .with_metadata(max_key, self.max.clone().unwrap_or(Value::Null))
                .with_metadata("inclusive", self.inclusive),
        )
    }
}
