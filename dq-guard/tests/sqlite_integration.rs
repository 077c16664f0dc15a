//! The built-in validators on SQLite, shared and per-worker.

#![cfg(feature = "sqlite")]

use dq_guard::core::{RuleSpec, RuleStatus, RunSettings, Severity};
use dq_guard::sources::{DataSource, SessionMode, SqliteSource};
use serde_json::json;
use std::sync::Arc;

const STORE: &str = "
    CREATE TABLE customers (id INTEGER PRIMARY KEY, email TEXT, age INTEGER);
    INSERT INTO customers VALUES
        (1, 'a@example.com', 30),
        (2, NULL, 41),
        (3, 'broken', 130),
        (4, 'd@example.com', 25);
    CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER, amount REAL);
    INSERT INTO orders VALUES
        (10, 1, 20.0), (11, 2, 35.5), (12, 99, 12.0), (13, 3, 5000.0), (14, 4, 18.0);
    CREATE TABLE people (first TEXT, last TEXT);
    INSERT INTO people VALUES ('Jane', 'Doe'), ('Jane', 'Doe'), ('jane', 'doe'), ('John', 'Smith');
";

fn rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new("emails_present", "completeness", Severity::High)
            .on_table("customers")
            .columns(["email"]),
        RuleSpec::new("orders_have_customers", "referential_integrity", Severity::Critical)
            .on_table("orders")
            .column("customer_id")
            .reference("customers", "id"),
        RuleSpec::new("plausible_age", "range", Severity::Medium)
            .on_table("customers")
            .column("age")
            .min(0)
            .max(120),
        RuleSpec::new("email_format", "pattern", Severity::Low)
            .on_table("customers")
            .column("email")
            .pattern("email"),
        RuleSpec::new("same_person", "duplicates", Severity::Medium)
            .on_table("people")
            .columns(["first", "last"]),
        RuleSpec::new("big_orders", "custom_sql", Severity::Low)
            .query("SELECT id, amount FROM orders WHERE amount > 1000"),
    ]
}

fn counts(report: &dq_guard::core::ValidationReport) -> Vec<(&str, u64)> {
    report
        .results()
        .iter()
        .map(|r| (r.rule_name.as_str(), r.violation_count))
        .collect()
}

const EXPECTED: [(&str, u64); 6] = [
    ("emails_present", 1),
    ("orders_have_customers", 1),
    ("plausible_age", 1),
    ("email_format", 1),
    ("same_person", 1),
    ("big_orders", 1),
];

#[tokio::test]
async fn test_file_database_with_worker_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let source = SqliteSource::open("store.db", dir.path().join("store.db"));
    source.execute_batch(STORE).await.unwrap();
    source.close().await.unwrap();
    assert_eq!(source.session_mode(), SessionMode::PerWorker);

    let report = dq_guard::run(
        rules(),
        Arc::new(source),
        RunSettings::default().with_max_workers(3),
    )
    .await
    .unwrap();

    assert_eq!(counts(&report), EXPECTED);
    for result in report.results() {
        assert_eq!(result.status, RuleStatus::Ok, "{:?}", result.error_message);
    }
    let orphans = report.result("orders_have_customers").unwrap();
    assert_eq!(orphans.metadata["orphan_values"], json!([99]));
    assert_eq!(report.connection(), "store.db");
}

#[tokio::test]
async fn test_in_memory_database_is_shared() {
    let source = SqliteSource::in_memory("memory");
    source.execute_batch(STORE).await.unwrap();
    assert_eq!(source.session_mode(), SessionMode::Shared);

    let report = dq_guard::run(
        rules(),
        Arc::new(source),
        RunSettings::default().with_max_workers(4),
    )
    .await
    .unwrap();

    assert_eq!(counts(&report), EXPECTED);
    let duplicates = report.result("same_person").unwrap();
    assert_eq!(duplicates.metadata["group_count"], json!(1));
    assert!(duplicates
        .sample_records
        .iter()
        .all(|row| row["first"] == json!("Jane") && row["group_size"] == json!(2)));
}

#[tokio::test]
async fn test_case_insensitive_duplicates() {
    let source = SqliteSource::in_memory("memory");
    source.execute_batch(STORE).await.unwrap();

    let rule = RuleSpec::new("same_person", "duplicates", Severity::Medium)
        .on_table("people")
        .columns(["first", "last"])
        .with_params(|p| p.case_sensitive = Some(false));
    let report = dq_guard::run(vec![rule], Arc::new(source), RunSettings::sequential())
        .await
        .unwrap();

    let result = &report.results()[0];
    assert_eq!(result.status, RuleStatus::Ok, "{:?}", result.error_message);
    assert_eq!(result.violation_count, 2);
}

#[tokio::test]
async fn test_in_memory_database_survives_repeated_runs() {
    let source = SqliteSource::in_memory("memory");
    source.execute_batch(STORE).await.unwrap();
    let source: Arc<dyn DataSource> = Arc::new(source);

    for settings in [RunSettings::default().with_max_workers(3), RunSettings::sequential()] {
        let report = dq_guard::run(rules(), Arc::clone(&source), settings).await.unwrap();
        assert_eq!(counts(&report), EXPECTED);
        for result in report.results() {
            assert_eq!(result.status, RuleStatus::Ok, "{:?}", result.error_message);
        }
    }
    assert!(source.test_connection().await);
}
