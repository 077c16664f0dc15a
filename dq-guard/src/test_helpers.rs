//! Fixtures and a scripted data source for unit tests.

use crate::error::{GuardError, Result};
use crate::sources::{DataFusionSource, DataSource, Row, SessionMode};
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn batch(fields: Vec<(&str, DataType, bool)>, columns: Vec<ArrayRef>) -> RecordBatch {
    let schema = Arc::new(Schema::new(
        fields
            .into_iter()
            .map(|(name, ty, nullable)| Field::new(name, ty, nullable))
            .collect::<Vec<_>>(),
    ));
    RecordBatch::try_new(schema, columns).unwrap()
}

/// A single nullable integer column.
pub fn int_table(table: &str, column: &str, values: &[Option<i64>]) -> DataFusionSource {
    let source = DataFusionSource::new("test");
    let batch = batch(
        vec![(column, DataType::Int64, true)],
        vec![Arc::new(Int64Array::from(values.to_vec()))],
    );
    source.register_batch(table, batch).unwrap();
    source
}

/// A single float column.
pub fn float_table(table: &str, column: &str, values: &[f64]) -> DataFusionSource {
    let source = DataFusionSource::new("test");
    let batch = batch(
        vec![(column, DataType::Float64, false)],
        vec![Arc::new(Float64Array::from(values.to_vec()))],
    );
    source.register_batch(table, batch).unwrap();
    source
}

/// `customers` and `orders` with known defects.
///
/// customers: NULL, empty and blank emails, one malformed email, ages -1
/// and 150 outside `[0, 120]`, one NULL name.
/// orders: two orders for the missing customer 99, one without a customer,
/// one shipped before it was ordered, amounts -5.0 and 5000.0, dates in
/// 2023 and 2030.
pub fn customers_and_orders() -> DataFusionSource {
    let source = DataFusionSource::new("shop");

    let customers = batch(
        vec![
            ("id", DataType::Int64, false),
            ("name", DataType::Utf8, true),
            ("email", DataType::Utf8, true),
            ("age", DataType::Int64, true),
        ],
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5, 6])),
            Arc::new(StringArray::from(vec![
                Some("Ann"),
                Some("Bob"),
                Some("Cy"),
                Some("Dee"),
                None,
                Some("Fay"),
            ])),
            Arc::new(StringArray::from(vec![
                Some("ann@example.com"),
                Some("not-an-email"),
                Some(""),
                Some("   "),
                Some("eve@test.org"),
                None,
            ])),
            Arc::new(Int64Array::from(vec![
                Some(34),
                Some(-1),
                Some(120),
                Some(150),
                None,
                Some(0),
            ])),
        ],
    );

    let orders = batch(
        vec![
            ("id", DataType::Int64, false),
            ("customer_id", DataType::Int64, true),
            ("amount", DataType::Float64, false),
            ("order_date", DataType::Utf8, false),
            ("ship_date", DataType::Utf8, true),
        ],
        vec![
            Arc::new(Int64Array::from(vec![101, 102, 103, 104, 105, 106])),
            Arc::new(Int64Array::from(vec![
                Some(1),
                Some(2),
                Some(3),
                Some(99),
                Some(99),
                None,
            ])),
            Arc::new(Float64Array::from(vec![25.0, 10.0, -5.0, 99.9, 5000.0, 12.5])),
            Arc::new(StringArray::from(vec![
                "2024-01-05",
                "2024-02-10",
                "2023-12-20",
                "2024-03-01",
                "2030-01-01",
                "2024-02-15",
            ])),
            Arc::new(StringArray::from(vec![
                Some("2024-01-07"),
                Some("2024-02-01"),
                Some("2023-12-22"),
                None,
                Some("2030-01-02"),
                Some("2024-02-16"),
            ])),
        ],
    );

    source.register_batch("customers", customers).unwrap();
    source.register_batch("orders", orders).unwrap();
    source
}

/// `clients`: Jane Doe twice, jane doe once, John Smith once, and two
/// clients with a NULL first name and last name Smith.
pub fn clients() -> DataFusionSource {
    let source = DataFusionSource::new("crm");
    let clients = batch(
        vec![
            ("id", DataType::Int64, false),
            ("first_name", DataType::Utf8, true),
            ("last_name", DataType::Utf8, true),
        ],
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5, 6])),
            Arc::new(StringArray::from(vec![
                Some("Jane"),
                Some("Jane"),
                Some("jane"),
                Some("John"),
                None,
                None,
            ])),
            Arc::new(StringArray::from(vec![
                Some("Doe"),
                Some("Doe"),
                Some("doe"),
                Some("Smith"),
                Some("Smith"),
                Some("Smith"),
            ])),
        ],
    );
    source.register_batch("clients", clients).unwrap();
    source
}

/// How the scripted source answers a matching query.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Counting queries return `n`; other queries return `n` rows
    Violations(u64),
    /// `n` rows regardless of the query
    Rows(usize),
    Error(String),
    ConnectionLost,
    Panic,
}

#[derive(Debug, Clone)]
struct Script {
    needle: String,
    reply: Reply,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    scripts: Mutex<Vec<Script>>,
    queries: Mutex<Vec<(usize, String)>>,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    sessions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a Inner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A data source answering queries from a script.
///
/// Scripts are matched by substring in registration order; unmatched
/// counting queries report zero violations and other queries return no
/// rows. Every query is logged with the id of the session that ran it
/// (0 for the source itself).
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    inner: Arc<Inner>,
    session: usize,
    mode: SessionMode,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            session: 0,
            mode: SessionMode::Shared,
        }
    }

    /// A source that hands each worker its own session.
    pub fn per_worker() -> Self {
        Self {
            mode: SessionMode::PerWorker,
            ..Self::new()
        }
    }

    pub fn script(&self, needle: &str, reply: Reply, delay: Option<Duration>) -> &Self {
        self.inner.scripts.lock().unwrap().push(Script {
            needle: needle.to_string(),
            reply,
            delay,
        });
        self
    }

    pub fn violations_on(&self, needle: &str, count: u64) -> &Self {
        self.script(needle, Reply::Violations(count), None)
    }

    pub fn slow_violations_on(&self, needle: &str, count: u64, delay: Duration) -> &Self {
        self.script(needle, Reply::Violations(count), Some(delay))
    }

    pub fn rows_on(&self, needle: &str, rows: usize) -> &Self {
        self.script(needle, Reply::Rows(rows), None)
    }

    pub fn fail_on(&self, needle: &str, message: &str) -> &Self {
        self.script(needle, Reply::Error(message.to_string()), None)
    }

    pub fn connection_lost_on(&self, needle: &str) -> &Self {
        self.script(needle, Reply::ConnectionLost, None)
    }

    pub fn panic_on(&self, needle: &str) -> &Self {
        self.script(needle, Reply::Panic, None)
    }

    pub fn fail_connect(&self) -> &Self {
        self.inner.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    /// Every query executed, in order.
    pub fn queries(&self) -> Vec<String> {
        self.session_queries().into_iter().map(|(_, q)| q).collect()
    }

    /// Every query executed with the id of the session that ran it.
    pub fn session_queries(&self) -> Vec<(usize, String)> {
        self.inner.queries.lock().unwrap().clone()
    }

    /// Queries containing `needle`.
    pub fn queries_matching(&self, needle: &str) -> usize {
        self.queries().iter().filter(|q| q.contains(needle)).count()
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.inner.sessions.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let mut row = Row::new();
                row.insert("id".into(), json!(i));
                row
            })
            .collect()
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self) -> Result<()> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(GuardError::connection("connection refused"));
        }
        Ok(())
    }

    async fn execute_query(&self, sql: &str) -> Result<Vec<Row>> {
        self.inner
            .queries
            .lock()
            .unwrap()
            .push((self.session, sql.to_string()));
        let _guard = InFlight::enter(&self.inner);

        let script = self
            .inner
            .scripts
            .lock()
            .unwrap()
            .iter()
            .find(|s| sql.contains(&s.needle))
            .cloned();
        let is_count = sql.contains("COUNT(");

        let Some(script) = script else {
            return Ok(if is_count {
                vec![json!({"violation_count": 0}).as_object().cloned().unwrap()]
            } else {
                Vec::new()
            });
        };
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        match script.reply {
            Reply::Violations(n) if is_count => {
                Ok(vec![json!({"violation_count": n}).as_object().cloned().unwrap()])
            }
            Reply::Violations(n) => Ok(Self::rows(n as usize)),
            Reply::Rows(n) => Ok(Self::rows(n)),
            Reply::Error(message) => Err(GuardError::query_execution(sql, message)),
            Reply::ConnectionLost => Err(GuardError::connection("connection reset by peer")),
            Reply::Panic => panic!("scripted panic for {sql}"),
        }
    }

    async fn test_connection(&self) -> bool {
        !self.inner.fail_connect.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn session_mode(&self) -> SessionMode {
        self.mode
    }

    async fn open_session(&self) -> Result<Arc<dyn DataSource>> {
        if self.mode != SessionMode::PerWorker {
            return Err(GuardError::NotSupported("shared source".to_string()));
        }
        let id = self.inner.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(Self {
            inner: Arc::clone(&self.inner),
            session: id,
            mode: self.mode,
        }))
    }
}
