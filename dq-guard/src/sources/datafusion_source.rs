//! In-process data source backed by a DataFusion `SessionContext`.

use super::{DataSource, Row, SessionMode};
use crate::error::{GuardError, Result};
use arrow::json::writer::{JsonArray, WriterBuilder};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use datafusion::datasource::TableProvider;
use datafusion::prelude::{CsvReadOptions, ParquetReadOptions, SessionContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument};

/// A data source over tables registered in a DataFusion session.
///
/// The session is safe for concurrent queries, so every worker shares the
/// same handle.
///
/// # Examples
///
/// ```rust
/// use dq_guard::sources::{DataFusionSource, DataSource};
/// use datafusion::arrow::array::Int64Array;
/// use datafusion::arrow::datatypes::{DataType, Field, Schema};
/// use datafusion::arrow::record_batch::RecordBatch;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> dq_guard::Result<()> {
/// let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
/// let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1, 2, 3]))])?;
///
/// let source = DataFusionSource::new("memory");
/// source.register_batch("ids", batch)?;
/// let rows = source.execute_query("SELECT COUNT(*) AS n FROM ids").await?;
/// assert_eq!(rows[0]["n"], 3);
/// # Ok(())
/// # }
/// ```
pub struct DataFusionSource {
    name: String,
    ctx: SessionContext,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for DataFusionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFusionSource")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl DataFusionSource {
    /// Creates a source with an empty session.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_context(name, SessionContext::new())
    }

    /// Wraps an existing session.
    pub fn with_context(name: impl Into<String>, ctx: SessionContext) -> Self {
        Self {
            name: name.into(),
            ctx,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The underlying session.
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Registers an in-memory batch as a table.
    pub fn register_batch(&self, table: &str, batch: RecordBatch) -> Result<()> {
        self.ctx.register_batch(table, batch)?;
        Ok(())
    }

    /// Registers any table provider.
    pub fn register_table(&self, table: &str, provider: Arc<dyn TableProvider>) -> Result<()> {
        self.ctx.register_table(table, provider)?;
        Ok(())
    }

    /// Registers a CSV file with a header row.
    pub async fn register_csv(&self, table: &str, path: &str) -> Result<()> {
        self.ctx
            .register_csv(table, path, CsvReadOptions::new().has_header(true))
            .await?;
        Ok(())
    }

    /// Registers a Parquet file.
    pub async fn register_parquet(&self, table: &str, path: &str) -> Result<()> {
        self.ctx
            .register_parquet(table, path, ParquetReadOptions::default())
            .await?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GuardError::connection(format!(
                "source '{}' is closed",
                self.name
            )));
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl DataSource for DataFusionSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        self.closed.store(false, Ordering::Release);
        if !self.connected.swap(true, Ordering::AcqRel) {
            debug!(source = %self.name, "DataFusion session ready");
        }
        Ok(())
    }

    #[instrument(skip(self, sql), fields(source = %self.name))]
    async fn execute_query(&self, sql: &str) -> Result<Vec<Row>> {
        self.ensure_open()?;

        let df = self.ctx.sql(sql).await.map_err(|e| {
            GuardError::query_execution_with_source(sql, e.to_string(), Box::new(e))
        })?;
        let batches = df.collect().await.map_err(|e| {
            GuardError::query_execution_with_source(sql, e.to_string(), Box::new(e))
        })?;

        let rows = batches_to_rows(&batches)?;
        debug!(rows = rows.len(), "Query returned");
        Ok(rows)
    }

    async fn test_connection(&self) -> bool {
        self.execute_query("SELECT 1 AS ok").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn session_mode(&self) -> SessionMode {
        SessionMode::Shared
    }
}

/// Converts record batches to rows using arrow's JSON writer.
///
/// NULLs are kept as explicit `null` values so every row carries every column.
pub(crate) fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Row>> {
    if batches.iter().all(|b| b.num_rows() == 0) {
        return Ok(Vec::new());
    }

    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer.write_batches(&refs)?;
    writer.finish()?;

    let buf = writer.into_inner();
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&buf)?)
}
