//! Run reports and the append-only run history.

use super::{RuleStatus, RunSettings, Severity, ValidationResult};
use crate::error::{ErrorContext, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Settings validated, source not yet connected
    Pending,
    /// Workers are evaluating rules
    Running,
    /// Every rule was evaluated
    Completed,
    /// A critical failure stopped the run; not-yet-started rules were skipped
    CriticallyStopped,
}

impl RunState {
    /// Returns true for the two terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::CriticallyStopped)
    }

    /// Runs move forward only: pending, running, then one terminal state.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Pending, RunState::Running)
                | (RunState::Running, RunState::Completed)
                | (RunState::Running, RunState::CriticallyStopped)
        )
    }
}

/// Counts derived from a report's results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    /// Results that are neither passing nor skipped (errors included)
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub insufficient_data: usize,
    /// Failed rules per severity; every severity is present
    pub failed_by_severity: BTreeMap<Severity, usize>,
}

impl ReportSummary {
    /// Computes the summary of `results`.
    pub fn from_results(results: &[ValidationResult]) -> Self {
        let mut failed_by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.iter().map(|s| (*s, 0)).collect();
        let mut summary = Self {
            total: results.len(),
            passed: 0,
            failed: 0,
            errors: 0,
            skipped: 0,
            insufficient_data: 0,
            failed_by_severity: BTreeMap::new(),
        };

        for result in results {
            if result.passed {
                summary.passed += 1;
            }
            if result.is_failure() {
                summary.failed += 1;
                *failed_by_severity.entry(result.severity).or_insert(0) += 1;
            }
            match result.status {
                RuleStatus::Error => summary.errors += 1,
                RuleStatus::Skipped => summary.skipped += 1,
                RuleStatus::InsufficientData => summary.insufficient_data += 1,
                RuleStatus::Ok => {}
            }
        }

        summary.failed_by_severity = failed_by_severity;
        summary
    }

    /// Failed rules of one severity.
    pub fn failed_with(&self, severity: Severity) -> usize {
        self.failed_by_severity.get(&severity).copied().unwrap_or(0)
    }
}

/// The sealed outcome of one run.
///
/// Results are in declaration order and there is exactly one per declared
/// rule. Reports are built by the engine's aggregator; all fields are
/// read-only through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    connection: String,
    run_started_at: DateTime<Utc>,
    #[serde(rename = "run_duration_secs", with = "duration_secs")]
    run_duration: Duration,
    state: RunState,
    settings: RunSettings,
    summary: ReportSummary,
    results: Vec<ValidationResult>,
}

impl ValidationReport {
    pub(crate) fn new(
        connection: impl Into<String>,
        run_started_at: DateTime<Utc>,
        run_duration: Duration,
        state: RunState,
        settings: RunSettings,
        results: Vec<ValidationResult>,
    ) -> Self {
        let summary = ReportSummary::from_results(&results);
        Self {
            connection: connection.into(),
            run_started_at,
            run_duration,
            state,
            settings,
            summary,
            results,
        }
    }

    /// Identifier of the data source the run was executed against.
    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn run_started_at(&self) -> DateTime<Utc> {
        self.run_started_at
    }

    pub fn run_duration(&self) -> Duration {
        self.run_duration
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn summary(&self) -> &ReportSummary {
        &self.summary
    }

    /// Results in declaration order.
    pub fn results(&self) -> &[ValidationResult] {
        &self.results
    }

    pub fn total(&self) -> usize {
        self.summary.total
    }

    pub fn passed_count(&self) -> usize {
        self.summary.passed
    }

    pub fn failed_count(&self) -> usize {
        self.summary.failed
    }

    pub fn failed_by_severity(&self) -> &BTreeMap<Severity, usize> {
        &self.summary.failed_by_severity
    }

    /// Finds a result by rule name.
    pub fn result(&self, rule_name: &str) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.rule_name == rule_name)
    }

    /// Failed results, most severe first; ties keep declaration order.
    pub fn failed_results(&self) -> Vec<&ValidationResult> {
        let mut failed: Vec<&ValidationResult> =
            self.results.iter().filter(|r| r.is_failure()).collect();
        failed.sort_by(|a, b| b.severity.cmp(&a.severity));
        failed
    }

    /// Failed critical results in declaration order.
    pub fn critical_failures(&self) -> Vec<&ValidationResult> {
        self.results
            .iter()
            .filter(|r| r.is_critical_failure())
            .collect()
    }

    /// Returns true when no rule failed.
    pub fn is_success(&self) -> bool {
        self.summary.failed == 0
    }
}

/// One line of the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub connection: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub critical: usize,
    pub high: usize,
    pub duration_secs: f64,
}

impl From<&ValidationReport> for HistoryRecord {
    fn from(report: &ValidationReport) -> Self {
        Self {
            timestamp: report.run_started_at,
            connection: report.connection.clone(),
            total: report.total(),
            passed: report.passed_count(),
            failed: report.failed_count(),
            critical: report.summary.failed_with(Severity::Critical),
            high: report.summary.failed_with(Severity::High),
            duration_secs: report.run_duration.as_secs_f64(),
        }
    }
}

/// An append-only JSON Lines file with one [`HistoryRecord`] per run.
///
/// # Examples
///
/// ```rust,no_run
/// use dq_guard::core::HistoryLog;
///
/// # fn example(report: &dq_guard::core::ValidationReport) -> dq_guard::Result<()> {
/// let log = HistoryLog::new("reports/dq_history.jsonl");
/// log.append(report)?;
/// println!("{} runs recorded", log.read_all()?.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the report's record as a single line. Existing lines are never
    /// rewritten.
    pub fn append(&self, report: &ValidationReport) -> Result<HistoryRecord> {
        let record = HistoryRecord::from(report);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;

        Ok(record)
    }

    /// Reads every record; a missing file is an empty history.
    pub fn read_all(&self) -> Result<Vec<HistoryRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }
        Ok(records)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
