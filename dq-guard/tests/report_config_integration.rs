//! From a JSON rule file to formatted output and the run history.

mod common;

use common::store;
use dq_guard::config::RunConfig;
use dq_guard::core::{HistoryLog, RuleStatus, ValidationReport};
use dq_guard::engine::Engine;
use dq_guard::formatters::{FormatterConfig, JsonFormatter, ResultFormatter, SummaryFormatter};
use dq_guard::validators::ValidatorRegistry;
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const RULES: &str = r#"{
    "settings": {"max_workers": 2, "sample_size": 2},
    "rules": [
        {"name": "emails_present", "type": "completeness", "severity": "critical",
         "table": "${DQ_GUARD_IT_TABLE}", "columns": ["email"]},
        {"name": "unique_ids", "type": "uniqueness", "severity": "high",
         "table": "${DQ_GUARD_IT_TABLE}", "column": "id"},
        {"type": "range", "severity": "medium", "table": "${DQ_GUARD_IT_TABLE}",
         "column": "age", "min": 0, "max": ${DQ_GUARD_IT_MAX_AGE}},
        {"name": "big_orders", "type": "custom_sql", "severity": "low",
         "query": "SELECT id, amount FROM orders WHERE amount > 1000"}
    ]
}"#;

async fn run_from_file() -> ValidationReport {
    std::env::set_var("DQ_GUARD_IT_TABLE", "customers");
    std::env::set_var("DQ_GUARD_IT_MAX_AGE", "120");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(RULES.as_bytes()).unwrap();
    let config = RunConfig::from_path(file.path()).unwrap();

    // the rule set is checked up front, as the engine would
    let rules = config.rule_set(&ValidatorRegistry::builtin()).unwrap();
    assert_eq!(rules.len(), 4);

    Engine::builder()
        .settings(config.settings.clone())
        .build()
        .run(config.rules, Arc::new(store()))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_config_file_drives_a_run() {
    let report = run_from_file().await;

    let names: Vec<&str> = report.results().iter().map(|r| r.rule_name.as_str()).collect();
    assert_eq!(names, ["emails_present", "unique_ids", "range_customers", "big_orders"]);
    assert!(report.results().iter().all(|r| r.status == RuleStatus::Ok));
    assert_eq!(report.settings().max_workers, 2);
    assert_eq!(report.connection(), "store");

    let range = report.result("range_customers").unwrap();
    assert_eq!(range.violation_count, 1);
    assert!(range.query.as_deref().unwrap().contains("120"));
}

#[tokio::test]
async fn test_json_output_round_trips() {
    let report = run_from_file().await;
    let json = JsonFormatter::new().format(&report).unwrap();
    let parsed: ValidationReport = serde_json::from_str(&json).unwrap();

    // durations are serialized at microsecond precision
    let without_timing = |report: &ValidationReport| {
        report
            .results()
            .iter()
            .cloned()
            .map(|mut r| {
                r.duration = Duration::ZERO;
                r
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(without_timing(&parsed), without_timing(&report));
    assert_eq!(parsed.summary(), report.summary());
    assert_eq!(parsed.connection(), report.connection());
    assert_eq!(parsed.state(), report.state());

    let minimal = JsonFormatter::with_config(FormatterConfig::minimal())
        .with_pretty(false)
        .format(&report)
        .unwrap();
    assert!(!minimal.contains('\n'));
    let value: Value = serde_json::from_str(&minimal).unwrap();
    let results = value["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results
        .iter()
        .all(|r| r.get("query").is_none() && r.get("sample_records").is_none()));
    assert_eq!(value["summary"]["failed"], 3);
}

#[tokio::test]
async fn test_summary_output() {
    let report = run_from_file().await;
    let text = SummaryFormatter::new().format(&report).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines[0], "dq-guard: FAILED on store (completed)");
    assert_eq!(lines[1], "4 rules: 1 passed, 3 failed (0 errors), 0 skipped");
    assert_eq!(lines[2], "critical: 1  high: 0  medium: 1  low: 1");
    assert!(text.contains("[critical] emails_present (completeness on customers): 1 violation\n"));
    assert!(text.contains("[low] big_orders (custom_sql): 1 violation\n"));
    assert!(!text.contains("unique_ids"));
    assert!(!text.contains("SELECT"));

    let capped = SummaryFormatter::with_config(FormatterConfig::alert().with_max_results(1))
        .format(&report)
        .unwrap();
    assert!(capped.ends_with("... and 2 more\n"));
}

#[tokio::test]
async fn test_history_accumulates_runs() {
    let dir = tempfile::tempdir().unwrap();
    let log = HistoryLog::new(dir.path().join("reports").join("history.jsonl"));
    assert!(log.read_all().unwrap().is_empty());

    let first = run_from_file().await;
    let second = run_from_file().await;
    log.append(&first).unwrap();
    let record = log.append(&second).unwrap();
    assert_eq!(record.total, 4);
    assert_eq!(record.passed, 1);
    assert_eq!(record.failed, 3);
    assert_eq!(record.critical, 1);
    assert_eq!(record.high, 0);

    let records = log.read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].timestamp, first.run_started_at());
    assert_eq!(records[1], record);

    let raw = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(raw.lines().count(), 2);
}
