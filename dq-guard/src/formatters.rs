//! Rendering validation reports for people and machines.
//!
//! [`JsonFormatter`] emits the full report for storage or other tools.
//! [`SummaryFormatter`] condenses a run to its failures, for alert channels
//! and consoles.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dq_guard::formatters::{JsonFormatter, ResultFormatter, SummaryFormatter};
//! # fn example(report: &dq_guard::core::ValidationReport) -> dq_guard::Result<()> {
//! let json = JsonFormatter::new().with_pretty(false).format(report)?;
//! let alert = SummaryFormatter::new().format(report)?;
//! # Ok(())
//! # }
//! ```

use crate::core::{RuleStatus, Severity, ValidationReport, ValidationResult};
use crate::error::{GuardError, Result};
use serde_json::Value;
use std::fmt::{self, Write};

/// What a formatter includes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatterConfig {
    /// Include sample rows of failing rules
    pub include_samples: bool,
    /// Include the query text of each result
    pub include_queries: bool,
    /// Include passing rules, not just failures
    pub include_passed: bool,
    /// Maximum number of results to list; `None` lists all
    pub max_results: Option<usize>,
    /// ANSI colors (summary formatter only)
    pub use_colors: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            include_samples: true,
            include_queries: true,
            include_passed: true,
            max_results: None,
            use_colors: false,
        }
    }
}

impl FormatterConfig {
    /// Counts and failing rule names only.
    pub fn minimal() -> Self {
        Self {
            include_samples: false,
            include_queries: false,
            include_passed: false,
            max_results: Some(10),
            use_colors: false,
        }
    }

    /// Failures with their evidence, bounded for alert payloads.
    pub fn alert() -> Self {
        Self {
            include_samples: true,
            include_queries: false,
            include_passed: false,
            max_results: Some(25),
            use_colors: false,
        }
    }

    pub fn with_samples(mut self, include: bool) -> Self {
        self.include_samples = include;
        self
    }

    pub fn with_queries(mut self, include: bool) -> Self {
        self.include_queries = include;
        self
    }

    pub fn with_passed(mut self, include: bool) -> Self {
        self.include_passed = include;
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    fn selected<'a>(&self, report: &'a ValidationReport) -> Vec<&'a ValidationResult> {
        let results: Vec<&ValidationResult> = if self.include_passed {
            report.results().iter().collect()
        } else {
            report.failed_results()
        };
        match self.max_results {
            Some(max) => results.into_iter().take(max).collect(),
            None => results,
        }
    }
}

/// Turns a report into text.
pub trait ResultFormatter {
    /// Formats with the formatter's own configuration.
    fn format(&self, report: &ValidationReport) -> Result<String>;

    /// Formats with an explicit configuration.
    fn format_with_config(
        &self,
        report: &ValidationReport,
        _config: &FormatterConfig,
    ) -> Result<String> {
        self.format(report)
    }
}

/// The report as JSON.
///
/// With the default configuration the output is the report's own serde
/// form and parses back into a [`ValidationReport`].
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    config: FormatterConfig,
    pretty: bool,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self {
            config: FormatterConfig::default(),
            pretty: true,
        }
    }

    pub fn with_config(config: FormatterConfig) -> Self {
        Self {
            config,
            pretty: true,
        }
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultFormatter for JsonFormatter {
    fn format(&self, report: &ValidationReport) -> Result<String> {
        self.format_with_config(report, &self.config)
    }

    fn format_with_config(
        &self,
        report: &ValidationReport,
        config: &FormatterConfig,
    ) -> Result<String> {
        let mut value = serde_json::to_value(report)?;
        let results = config
            .selected(report)
            .into_iter()
            .map(|result| filter_result(result, config))
            .collect::<Result<Vec<Value>>>()?;
        if let Some(object) = value.as_object_mut() {
            object.insert("results".to_string(), Value::Array(results));
        }

        let json = if self.pretty {
            serde_json::to_string_pretty(&value)
        } else {
            serde_json::to_string(&value)
        };
        json.map_err(|e| GuardError::Internal(format!("Failed to serialize report to JSON: {e}")))
    }
}

fn filter_result(result: &ValidationResult, config: &FormatterConfig) -> Result<Value> {
    let mut value = serde_json::to_value(result)?;
    if let Some(object) = value.as_object_mut() {
        if !config.include_samples {
            object.remove("sample_records");
        }
        if !config.include_queries {
            object.remove("query");
        }
    }
    Ok(value)
}

/// A short text summary of a run, failures first.
///
/// ```text
/// dq-guard: FAILED on warehouse (completed)
/// 3 rules: 1 passed, 2 failed (1 error), 0 skipped
/// critical: 1  high: 1  medium: 0  low: 0
///
/// [critical] orphan_orders (referential_integrity on orders): 2 violations
/// [high] emails_present (completeness on customers): error: Query execution failed: ...
/// ```
#[derive(Debug, Clone)]
pub struct SummaryFormatter {
    config: FormatterConfig,
}

impl Default for SummaryFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryFormatter {
    /// A summary of failures only, without queries.
    pub fn new() -> Self {
        Self {
            config: FormatterConfig::alert().with_samples(false),
        }
    }

    pub fn with_config(config: FormatterConfig) -> Self {
        Self { config }
    }

    fn render(
        &self,
        report: &ValidationReport,
        config: &FormatterConfig,
        out: &mut String,
    ) -> fmt::Result {
        let summary = report.summary();
        let verdict = if report.is_success() { "PASSED" } else { "FAILED" };
        let verdict = paint(verdict, if report.is_success() { GREEN } else { RED }, config);
        let state = match report.state() {
            crate::core::RunState::CriticallyStopped => "critically stopped",
            _ => "completed",
        };
        writeln!(out, "dq-guard: {verdict} on {} ({state})", report.connection())?;
        writeln!(
            out,
            "{} rules: {} passed, {} failed ({} error{}), {} skipped",
            summary.total,
            summary.passed,
            summary.failed,
            summary.errors,
            if summary.errors == 1 { "" } else { "s" },
            summary.skipped
        )?;
        let by_severity: Vec<String> = Severity::ALL
            .iter()
            .rev()
            .map(|s| format!("{s}: {}", summary.failed_with(*s)))
            .collect();
        writeln!(out, "{}", by_severity.join("  "))?;

        let selected = config.selected(report);
        if !selected.is_empty() {
            writeln!(out)?;
        }
        for result in &selected {
            self.render_result(result, config, out)?;
        }
        let listed = if config.include_passed {
            report.total()
        } else {
            summary.failed
        };
        if listed > selected.len() {
            writeln!(out, "... and {} more", listed - selected.len())?;
        }
        Ok(())
    }

    fn render_result(
        &self,
        result: &ValidationResult,
        config: &FormatterConfig,
        out: &mut String,
    ) -> fmt::Result {
        let tag = format!("[{}]", result.severity);
        let tag = match result.severity {
            Severity::Critical | Severity::High => paint(&tag, RED, config),
            Severity::Medium => paint(&tag, YELLOW, config),
            Severity::Low => tag,
        };
        let target = match &result.table {
            Some(table) => format!("{} on {table}", result.rule_type),
            None => result.rule_type.clone(),
        };
        let outcome = match result.status {
            RuleStatus::Error => format!(
                "error: {}",
                result.error_message.as_deref().unwrap_or("unknown error")
            ),
            RuleStatus::Skipped => "skipped".to_string(),
            RuleStatus::InsufficientData => "insufficient data".to_string(),
            RuleStatus::Ok if result.passed => "passed".to_string(),
            RuleStatus::Ok => format!(
                "{} violation{}",
                result.violation_count,
                if result.violation_count == 1 { "" } else { "s" }
            ),
        };
        writeln!(out, "{tag} {} ({target}): {outcome}", result.rule_name)?;

        if config.include_queries {
            if let Some(query) = &result.query {
                writeln!(out, "    query: {query}")?;
            }
        }
        if config.include_samples {
            for row in &result.sample_records {
                writeln!(out, "    {}", Value::Object(row.clone()))?;
            }
        }
        Ok(())
    }
}

impl ResultFormatter for SummaryFormatter {
    fn format(&self, report: &ValidationReport) -> Result<String> {
        self.format_with_config(report, &self.config)
    }

    fn format_with_config(
        &self,
        report: &ValidationReport,
        config: &FormatterConfig,
    ) -> Result<String> {
        let mut out = String::new();
        self.render(report, config, &mut out)
            .map_err(|e| GuardError::Internal(format!("Failed to render summary: {e}")))?;
        Ok(out)
    }
}

const RED: &str = "31";
const GREEN: &str = "32";
const YELLOW: &str = "33";

fn paint(text: &str, color: &str, config: &FormatterConfig) -> String {
    if config.use_colors {
        format!("\x1b[{color}m{text}\x1b[0m")
    } else {
        text.to_string()
    }
}
