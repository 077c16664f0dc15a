//! Data source adapters.
//!
//! The engine talks to data only through the [`DataSource`] trait: it sends
//! query text and receives ordered rows. Each backend is a separate adapter
//! and the engine never branches on which one it is talking to.
//!
//! - [`DataFusionSource`]: in-process tables (record batches, CSV, Parquet)
//! - `SqliteSource` (feature `sqlite`): SQLite files or in-memory databases

use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::sync::Arc;

mod datafusion_source;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use datafusion_source::DataFusionSource;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSource;

/// One result row: column name to value, in the query's column order.
pub type Row = Map<String, Value>;

/// How a source may be used by concurrent workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// One handle can serve every worker concurrently
    Shared,
    /// Each worker needs its own session, opened with [`DataSource::open_session`]
    PerWorker,
}

/// A queryable data source.
///
/// # Examples
///
/// ```rust,no_run
/// use dq_guard::sources::{DataFusionSource, DataSource};
///
/// # async fn example() -> dq_guard::Result<()> {
/// let source = DataFusionSource::new("warehouse");
/// source.register_csv("orders", "data/orders.csv").await?;
/// source.connect().await?;
/// let rows = source.execute_query("SELECT COUNT(*) AS n FROM \"orders\"").await?;
/// println!("{rows:?}");
/// source.close().await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait DataSource: Debug + Send + Sync {
    /// Connection identifier used in reports and logs.
    fn name(&self) -> &str;

    /// Connects to the backend. Calling it again on a live source is a no-op.
    ///
    /// Fails with [`GuardError::Connection`](crate::GuardError::Connection).
    async fn connect(&self) -> Result<()>;

    /// Executes `sql` and returns its rows in result order.
    async fn execute_query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Returns true if the backend answers a trivial query.
    async fn test_connection(&self) -> bool;

    /// Releases the connection. Later queries fail with a connection error.
    async fn close(&self) -> Result<()>;

    /// Whether workers may share this handle.
    fn session_mode(&self) -> SessionMode {
        SessionMode::Shared
    }

    /// Opens an independent, connected session for one worker.
    ///
    /// Only called for [`SessionMode::PerWorker`] sources.
    async fn open_session(&self) -> Result<Arc<dyn DataSource>> {
        Err(crate::error::GuardError::NotSupported(format!(
            "source '{}' does not open per-worker sessions",
            self.name()
        )))
    }
}

/// Extracts a non-negative count from the first row of `rows`.
///
/// Looks for the `key` column first, then falls back to the row's only
/// column. Missing rows count as zero.
pub(crate) fn first_count(rows: &[Row], key: &str) -> Option<u64> {
    let Some(row) = rows.first() else {
        return Some(0);
    };
    let value = match row.get(key) {
        Some(value) => value,
        None if row.len() == 1 => row.values().next()?,
        None => return None,
    };
    value_as_u64(value)
}

/// Reads a count from a JSON value, accepting integers, floats and numeric strings.
pub(crate) fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Null => Some(0),
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().map(|v| v.max(0) as u64))
            .or_else(|| n.as_f64().map(|v| v.max(0.0).round() as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|v| v.max(0.0).round() as u64),
        _ => None,
    }
}

/// Reads a float from a JSON value; NULL stays `None`.
pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
