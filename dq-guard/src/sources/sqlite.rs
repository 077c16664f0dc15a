//! SQLite data source.

use super::{DataSource, Row, SessionMode};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    File(PathBuf),
    Memory,
}

/// A data source over a SQLite database.
///
/// A SQLite connection cannot serve two queries at once. File databases
/// therefore hand each worker its own connection through
/// [`DataSource::open_session`]; in-memory databases exist only inside their
/// one connection, so they are shared and queries are serialized.
///
/// The connection registers a `regexp_like(text, pattern)` function backed by
/// the `regex` crate so pattern rules run unchanged on SQLite.
pub struct SqliteSource {
    name: String,
    target: Target,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl std::fmt::Debug for SqliteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSource")
            .field("name", &self.name)
            .field("target", &self.target)
            .finish()
    }
}

impl SqliteSource {
    /// A source over the database file at `path`.
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            target: Target::File(path.as_ref().to_path_buf()),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// A source over a private in-memory database.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: Target::Memory,
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs a batch of statements, for loading fixtures.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.connect().await?;
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| GuardError::Internal(format!("Failed to acquire lock: {e}")))?;
            let conn = guard
                .as_ref()
                .ok_or_else(|| GuardError::connection("SQLite connection is closed"))?;
            conn.execute_batch(&sql).map_err(|e| {
                GuardError::query_execution_with_source(sql.clone(), e.to_string(), Box::new(e))
            })
        })
        .await
        .map_err(|e| GuardError::Internal(format!("SQLite task failed: {e}")))?
    }

    fn open_connection(target: &Target) -> Result<Connection> {
        let conn = match target {
            Target::File(path) => Connection::open(path),
            Target::Memory => Connection::open_in_memory(),
        }
        .map_err(|e| GuardError::connection(format!("Failed to open SQLite database: {e}")))?;

        conn.create_scalar_function(
            "regexp_like",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let regex: Arc<Regex> =
                    ctx.get_or_create_aux(1, |pattern| -> std::result::Result<_, BoxError> {
                        Ok(Regex::new(pattern.as_str()?)?)
                    })?;
                let text = match ctx.get_raw(0) {
                    ValueRef::Null => return Ok(None),
                    ValueRef::Integer(i) => i.to_string(),
                    ValueRef::Real(f) => f.to_string(),
                    ValueRef::Text(t) | ValueRef::Blob(t) => {
                        String::from_utf8_lossy(t).into_owned()
                    }
                };
                Ok(Some(regex.is_match(&text)))
            },
        )
        .map_err(|e| GuardError::connection(format!("Failed to register regexp_like: {e}")))?;

        Ok(conn)
    }
}

fn value_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

fn query_rows(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (i, column) in columns.iter().enumerate() {
            record.insert(column.clone(), value_from_sql(row.get_ref(i)?));
        }
        out.push(record);
    }
    Ok(out)
}

#[async_trait]
impl DataSource for SqliteSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let target = self.target.clone();
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| GuardError::Internal(format!("Failed to acquire lock: {e}")))?;
            if guard.is_none() {
                *guard = Some(Self::open_connection(&target)?);
                debug!(source = %name, "SQLite connection opened");
            }
            Ok(())
        })
        .await
        .map_err(|e| GuardError::Internal(format!("SQLite task failed: {e}")))?
    }

    #[instrument(skip(self, sql), fields(source = %self.name))]
    async fn execute_query(&self, sql: &str) -> Result<Vec<Row>> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| GuardError::Internal(format!("Failed to acquire lock: {e}")))?;
            let conn = guard
                .as_ref()
                .ok_or_else(|| GuardError::connection("SQLite connection is not open"))?;
            query_rows(conn, &sql).map_err(|e| {
                GuardError::query_execution_with_source(sql.clone(), e.to_string(), Box::new(e))
            })
        })
        .await
        .map_err(|e| GuardError::Internal(format!("SQLite task failed: {e}")))?
    }

    async fn test_connection(&self) -> bool {
        self.execute_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| GuardError::Internal(format!("Failed to acquire lock: {e}")))?;
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, e)| GuardError::connection(format!("Failed to close SQLite: {e}")))?;
        }
        Ok(())
    }

    fn session_mode(&self) -> SessionMode {
        match self.target {
            Target::File(_) => SessionMode::PerWorker,
            Target::Memory => SessionMode::Shared,
        }
    }

    async fn open_session(&self) -> Result<Arc<dyn DataSource>> {
        match &self.target {
            Target::File(path) => {
                let session = SqliteSource::open(self.name.clone(), path);
                session.connect().await?;
                Ok(Arc::new(session))
            }
            Target::Memory => Err(GuardError::NotSupported(
                "in-memory SQLite databases cannot open separate sessions".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_rows_and_types() {
        let source = SqliteSource::in_memory("mem");
        source
            .execute_batch(
                "CREATE TABLE t (id INTEGER, name TEXT, score REAL, raw BLOB);
                 INSERT INTO t VALUES (1, 'ann', 1.5, x'0aff'), (2, NULL, NULL, NULL);",
            )
            .await
            .unwrap();

        let rows = source
            .execute_query("SELECT id, name, score, raw FROM t ORDER BY id")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["score"], json!(1.5));
        assert_eq!(rows[0]["raw"], json!("0aff"));
        assert_eq!(rows[1]["name"], json!(null));
    }

    #[tokio::test]
    async fn test_regexp_like() {
        let source = SqliteSource::in_memory("mem");
        source.connect().await.unwrap();
        let rows = source
            .execute_query(
                "SELECT regexp_like('a@b.io', '^[^@]+@[^@]+$') AS ok, \
                 regexp_like('nope', '^[0-9]+$') AS bad, \
                 regexp_like(NULL, 'x') AS missing",
            )
            .await
            .unwrap();
        assert_eq!(rows[0]["ok"], json!(1));
        assert_eq!(rows[0]["bad"], json!(0));
        assert_eq!(rows[0]["missing"], json!(null));
    }

    #[tokio::test]
    async fn test_file_sessions_are_per_worker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dq.db");
        let source = SqliteSource::open("file", &path);
        source
            .execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2);")
            .await
            .unwrap();

        assert_eq!(source.session_mode(), SessionMode::PerWorker);
        let session = source.open_session().await.unwrap();
        let rows = session.execute_query("SELECT COUNT(*) AS n FROM t").await.unwrap();
        assert_eq!(rows[0]["n"], json!(2));
        session.close().await.unwrap();
        source.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_before_connect_fails() {
        let source = SqliteSource::in_memory("mem");
        let err = source.execute_query("SELECT 1").await.unwrap_err();
        assert!(err.is_connection());
        assert!(!source.test_connection().await);
    }
}
