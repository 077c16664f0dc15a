//! # dq-guard - Rule-Driven Data Quality Checks
//!
//! dq-guard runs a declared set of data-quality rules against a data source
//! and produces a deterministic, ordered report of what passed, what failed
//! and why. Each rule becomes one or more SQL queries; every result carries
//! its violation count, a bounded sample of offending rows, the query that
//! found them and how long it took.
//!
//! ## Quick Start
//!
//! ```rust
//! use dq_guard::prelude::*;
//! use datafusion::arrow::array::{Int64Array, StringArray};
//! use datafusion::arrow::datatypes::{DataType, Field, Schema};
//! use datafusion::arrow::record_batch::RecordBatch;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("id", DataType::Int64, false),
//!     Field::new("email", DataType::Utf8, true),
//! ]));
//! let batch = RecordBatch::try_new(
//!     schema,
//!     vec![
//!         Arc::new(Int64Array::from(vec![1, 2, 3])),
//!         Arc::new(StringArray::from(vec![Some("a@example.com"), None, Some("c@example.com")])),
//!     ],
//! )?;
//! let source = DataFusionSource::new("users_db");
//! source.register_batch("users", batch)?;
//!
//! let rules = vec![
//!     RuleSpec::new("email_present", "completeness", Severity::Critical)
//!         .on_table("users")
//!         .columns(["email"]),
//!     RuleSpec::new("id_unique", "uniqueness", Severity::High)
//!         .on_table("users")
//!         .column("id"),
//! ];
//!
//! let report = dq_guard::run(rules, Arc::new(source), RunSettings::default()).await?;
//!
//! assert_eq!(report.total(), 2);
//! assert_eq!(report.results()[0].violation_count, 1);
//! assert!(report.results()[1].passed);
//! println!("{}", SummaryFormatter::new().format(&report)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Features
//!
//! ### Validators
//!
//! - **completeness**: NULL (and optionally empty or blank) values
//! - **referential_integrity**: orphaned foreign keys
//! - **duplicates** / **uniqueness**: repeated keys, counted as excess rows
//! - **range** / **date_range**: values outside numeric or date bounds
//! - **pattern**: regex or named-pattern mismatches
//! - **cross_field**: rows violating a boolean expression over columns
//! - **outliers**: z-score or IQR outliers, computed in two passes
//! - **custom_sql**: any read-only query whose rows are violations
//!
//! Further rule types can be added through
//! [`ValidatorRegistry::register`](validators::ValidatorRegistry::register).
//!
//! ### Execution
//!
//! Rules run on a bounded worker pool (`max_workers`) or strictly in order
//! when `parallel_execution` is off. With `stop_on_critical`, a failing
//! critical rule stops the rules that have not started yet; they are
//! reported as `skipped`. The report is always in declaration order and has
//! exactly one result per declared rule.
//!
//! ### Failure isolation
//!
//! Only configuration errors (duplicate rule names, unknown rule types,
//! invalid settings) abort a run. A malformed rule, a failing query, a
//! timeout or a panicking validator becomes an `error` result for that rule
//! alone. A lost connection marks the rules that have not started as errors.
//!
//! ## Architecture
//!
//! - **`core`**: rules, settings, results, reports and the run history
//! - **`validators`**: the [`Validator`](validators::Validator) trait, the registry and the built-in validators
//! - **`analyzers`**: the two-pass statistical outlier analyzer
//! - **`engine`**: scheduler, result aggregator and progress events
//! - **`sources`**: the [`DataSource`](sources::DataSource) trait with DataFusion and SQLite backends
//! - **`security`**: identifier quoting and query guards for generated SQL
//! - **`config`**: JSON rule files with environment substitution
//! - **`formatters`**: JSON and text summaries of reports
//! - **`logging`**: `tracing` configuration

pub mod analyzers;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod formatters;
pub mod logging;
pub mod prelude;
pub mod security;
pub mod sources;
pub mod validators;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use engine::run;
pub use error::{GuardError, Result};
