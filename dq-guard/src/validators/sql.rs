//! SQL building blocks shared by the built-in validators.
//!
//! Generated SQL sticks to a portable subset: double-quoted identifiers,
//! `LIMIT`/`OFFSET`, `CAST(x AS DOUBLE)`, `CAST(x AS VARCHAR)` and
//! `regexp_like`.

use crate::core::RuleSpec;
use crate::error::{GuardError, Result};
use crate::security::SqlSecurity;
use crate::sources::{first_count, DataSource, Row};
use serde_json::Value;

/// Renders a float as a SQL numeric literal.
///
/// `Display` for `f64` never uses exponent notation, so the output parses
/// on every backend. Negative values are parenthesized so they can follow a
/// binary minus.
pub(crate) fn sql_number(value: f64) -> String {
    if value < 0.0 {
        format!("({value})")
    } else {
        format!("{value}")
    }
}

/// Renders a rule parameter as a SQL literal.
pub(crate) fn sql_literal(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(if i < 0 { format!("({i})") } else { i.to_string() })
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().filter(|f| f.is_finite()).map(sql_number)
            }
        }
        Value::String(s) => Some(SqlSecurity::escape_literal(s)),
        Value::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        _ => None,
    }
}

/// `SELECT COUNT(*) AS violation_count FROM {table} WHERE {predicate}`.
pub(crate) fn count_query(table: &str, predicate: &str) -> String {
    format!("SELECT COUNT(*) AS violation_count FROM {table} WHERE {predicate}")
}

/// `SELECT * FROM {table} WHERE {predicate}`.
pub(crate) fn selection_query(table: &str, predicate: &str) -> String {
    format!("SELECT * FROM {table} WHERE {predicate}")
}

/// Rows violating a predicate: counted first, then sampled.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Counted {
    pub violation_count: u64,
    pub samples: Vec<Row>,
}

/// Counts the rows of `table` matching `predicate` and fetches at most
/// `sample_size` of them when there are any.
pub(crate) async fn count_and_sample(
    source: &dyn DataSource,
    table: &str,
    predicate: &str,
    sample_size: usize,
) -> Result<Counted> {
    let query = count_query(table, predicate);
    let rows = source.execute_query(&query).await?;
    let violation_count = first_count(&rows, "violation_count").ok_or_else(|| {
        GuardError::query_execution(&query, "count query returned no count column")
    })?;

    let samples = if violation_count > 0 && sample_size > 0 {
        let sample = format!("{} LIMIT {sample_size}", selection_query(table, predicate));
        source.execute_query(&sample).await?
    } else {
        Vec::new()
    };

    Ok(Counted {
        violation_count,
        samples,
    })
}

/// Typed access to a rule's parameters with validator-config errors.
pub(crate) struct Params<'a> {
    rule: &'a RuleSpec,
}

impl<'a> Params<'a> {
    pub fn new(rule: &'a RuleSpec) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &'a RuleSpec {
        self.rule
    }

    /// A validator-config error for this rule.
    pub fn error(&self, message: impl Into<String>) -> GuardError {
        GuardError::validator_config(self.rule.name(), message)
    }

    /// Quotes an identifier, reporting unsafe names as rule errors.
    pub fn quote(&self, identifier: &str) -> Result<String> {
        SqlSecurity::escape_identifier(identifier).map_err(|e| self.error(e.to_string()))
    }

    /// The quoted table.
    pub fn table(&self) -> Result<String> {
        match self.rule.table.as_deref() {
            Some(table) if !table.trim().is_empty() => self.quote(table),
            _ => Err(self.error(format!("{} requires 'table'", self.rule.rule_type))),
        }
    }

    /// The single `column` parameter, unquoted.
    pub fn column(&self) -> Result<&'a str> {
        match self.rule.params.column.as_deref() {
            Some(column) if !column.trim().is_empty() => Ok(column),
            _ => Err(self.error(format!("{} requires 'column'", self.rule.rule_type))),
        }
    }

    /// The non-empty `columns` list, unquoted.
    pub fn columns(&self) -> Result<&'a [String]> {
        match self.rule.params.columns.as_deref() {
            Some(columns) if !columns.is_empty() => Ok(columns),
            _ => Err(self.error(format!(
                "{} requires a non-empty 'columns' list",
                self.rule.rule_type
            ))),
        }
    }

    /// A required string parameter.
    pub fn required(&self, name: &str, value: &'a Option<String>) -> Result<&'a str> {
        match value.as_deref() {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(self.error(format!("{} requires '{name}'", self.rule.rule_type))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;
    use serde_json::json;

    #[test]
    fn test_sql_number_has_no_exponent() {
        assert_eq!(sql_number(14.5), "14.5");
        assert_eq!(sql_number(-3.5), "(-3.5)");
        assert_eq!(sql_number(1e21), "1000000000000000000000");
        assert_eq!(sql_number(0.000001), "0.000001");
    }

    #[test]
    fn test_sql_literal() {
        assert_eq!(sql_literal(&json!(120)).as_deref(), Some("120"));
        assert_eq!(sql_literal(&json!(-5)).as_deref(), Some("(-5)"));
        assert_eq!(sql_literal(&json!(0.5)).as_deref(), Some("0.5"));
        assert_eq!(sql_literal(&json!("2024-01-01")).as_deref(), Some("'2024-01-01'"));
        assert_eq!(sql_literal(&json!("O'Neil")).as_deref(), Some("'O''Neil'"));
        assert_eq!(sql_literal(&json!(null)), None);
        assert_eq!(sql_literal(&json!([1])), None);
    }

    #[test]
    fn test_params_errors_name_the_rule() {
        let rule = RuleSpec::new("r1", "completeness", Severity::Low);
        let params = Params::new(&rule);
        let err = params.table().unwrap_err();
        assert!(matches!(err, GuardError::ValidatorConfig { .. }));
        assert!(err.to_string().contains("'r1'"));
        assert!(params.columns().is_err());

        let rule = rule.on_table("bad table").columns(["a"]);
        let params = Params::new(&rule);
        assert!(matches!(
            params.table().unwrap_err(),
            GuardError::ValidatorConfig { .. }
        ));
        assert_eq!(params.columns().unwrap(), ["a".to_string()]);
    }
}
