//! Shared fixtures for integration tests.

#![allow(dead_code)]

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use dq_guard::sources::{DataFusionSource, DataSource, Row};
use dq_guard::{GuardError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
            .collect::<Vec<_>>(),
    ));
    RecordBatch::try_new(schema, columns.into_iter().map(|(_, a)| a).collect()).unwrap()
}

pub fn ints(values: &[Option<i64>]) -> ArrayRef {
    Arc::new(Int64Array::from(values.to_vec()))
}

pub fn floats(values: &[f64]) -> ArrayRef {
    Arc::new(Float64Array::from(values.to_vec()))
}

pub fn strings(values: &[Option<&str>]) -> ArrayRef {
    Arc::new(StringArray::from(values.to_vec()))
}

/// A source holding one numeric column `v` in table `t`.
pub fn numbers(values: &[f64]) -> DataFusionSource {
    let source = DataFusionSource::new("numbers");
    source
        .register_batch("t", batch(vec![("v", floats(values))]))
        .unwrap();
    source
}

/// `people`: three identical Jane Doe rows and one John Smith.
pub fn people() -> DataFusionSource {
    let source = DataFusionSource::new("people");
    let people = batch(vec![
        ("id", ints(&[Some(1), Some(2), Some(3), Some(4)])),
        ("first", strings(&[Some("Jane"), Some("Jane"), Some("Jane"), Some("John")])),
        ("last", strings(&[Some("Doe"), Some("Doe"), Some("Doe"), Some("Smith")])),
        (
            "dob",
            strings(&[
                Some("1990-01-01"),
                Some("1990-01-01"),
                Some("1990-01-01"),
                Some("1985-05-05"),
            ]),
        ),
    ]);
    source.register_batch("people", people).unwrap();
    source
}

/// A small store: `customers` and `orders` with known defects.
///
/// customers: one NULL email, one malformed email, one age above 120.
/// orders: one order for the missing customer 99, one amount of 5000.
pub fn store() -> DataFusionSource {
    let source = DataFusionSource::new("store");
    let customers = batch(vec![
        ("id", ints(&[Some(1), Some(2), Some(3), Some(4)])),
        (
            "email",
            strings(&[Some("a@example.com"), None, Some("broken"), Some("d@example.com")]),
        ),
        ("age", ints(&[Some(30), Some(41), Some(130), Some(25)])),
    ]);
    let orders = batch(vec![
        ("id", ints(&[Some(10), Some(11), Some(12), Some(13), Some(14)])),
        ("customer_id", ints(&[Some(1), Some(2), Some(99), Some(3), Some(4)])),
        ("amount", floats(&[20.0, 35.5, 12.0, 5000.0, 18.0])),
    ]);
    source.register_batch("customers", customers).unwrap();
    source.register_batch("orders", orders).unwrap();
    source
}

/// Wraps a source with per-needle delays and a switch that drops the
/// connection.
#[derive(Debug)]
pub struct Flaky {
    inner: DataFusionSource,
    delays: Vec<(String, Duration)>,
    drop_on: Mutex<Option<String>>,
    dropped: AtomicBool,
    log: Mutex<Vec<String>>,
}

impl Flaky {
    pub fn new(inner: DataFusionSource) -> Self {
        Self {
            inner,
            delays: Vec::new(),
            drop_on: Mutex::new(None),
            dropped: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn delay(mut self, needle: &str, delay: Duration) -> Self {
        self.delays.push((needle.to_string(), delay));
        self
    }

    /// The first query containing `needle` loses the connection for good.
    pub fn drop_connection_on(self, needle: &str) -> Self {
        *self.drop_on.lock().unwrap() = Some(needle.to_string());
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for Flaky {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    async fn execute_query(&self, sql: &str) -> Result<Vec<Row>> {
        self.log.lock().unwrap().push(sql.to_string());
        if self.dropped.load(Ordering::SeqCst) {
            return Err(GuardError::connection("server closed the connection"));
        }
        let trigger = self
            .drop_on
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|needle| sql.contains(needle));
        if trigger {
            self.dropped.store(true, Ordering::SeqCst);
            return Err(GuardError::connection("server closed the connection"));
        }
        if let Some((_, delay)) = self.delays.iter().find(|(needle, _)| sql.contains(needle)) {
            tokio::time::sleep(*delay).await;
        }
        self.inner.execute_query(sql).await
    }

    async fn test_connection(&self) -> bool {
        !self.dropped.load(Ordering::SeqCst) && self.inner.test_connection().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
