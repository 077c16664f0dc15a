//! Two-pass statistical outlier detection.
//!
//! Pass one aggregates the column (mean and standard deviation, or the
//! quartiles) and derives bounds. Pass two pushes the bounds back into the
//! data source to count and sample the values outside them, so the column is
//! never loaded into memory.
//!
//! ```text
//!  zscore: COUNT, AVG ──> SUM((x - mean)^2) ──> mean ± t·sd ──┐
//!  iqr:    COUNT ──> x[p·(n-1)] for p in .25 .5 .75 ──> q1 - m·iqr, q3 + m·iqr
//!                                                             │
//!                                   COUNT(*) WHERE outside <──┘──> sample rows
//! ```
//!
//! The variance is computed from squared deviations around the mean from the
//! first query, which stays accurate for large values where `E[x²] - E[x]²`
//! cancels catastrophically.

use crate::error::{GuardError, Result};
use crate::security::SqlSecurity;
use crate::sources::{first_count, value_as_f64, DataSource, Row};
use crate::validators::sql::{count_query, selection_query, sql_number};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument};

/// Default z-score threshold.
pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 3.0;
/// Default IQR multiplier.
pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;

/// Outlier detection method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutlierMethod {
    /// Flags `x` with `|x - mean| / stddev > threshold`
    ZScore { threshold: f64 },
    /// Flags `x` outside `[q1 - m·iqr, q3 + m·iqr]`
    Iqr { multiplier: f64 },
}

impl OutlierMethod {
    /// Parses a method name with its parameter; `None` selects the default.
    pub fn parse(name: &str, parameter: Option<f64>) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "zscore" | "z_score" | "z-score" => Ok(Self::ZScore {
                threshold: parameter.unwrap_or(DEFAULT_ZSCORE_THRESHOLD),
            }),
            "iqr" => Ok(Self::Iqr {
                multiplier: parameter.unwrap_or(DEFAULT_IQR_MULTIPLIER),
            }),
            other => Err(GuardError::Configuration(format!(
                "unknown outlier method '{other}' (expected 'zscore' or 'iqr')"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ZScore { .. } => "zscore",
            Self::Iqr { .. } => "iqr",
        }
    }
}

/// Which side of the distribution is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Both,
    High,
    Low,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Both => "both",
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

impl FromStr for Direction {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(Self::Both),
            "high" | "upper" => Ok(Self::High),
            "low" | "lower" => Ok(Self::Low),
            other => Err(GuardError::Configuration(format!(
                "unknown outlier direction '{other}' (expected 'both', 'high' or 'low')"
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate statistics from pass one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistics {
    ZScore {
        count: u64,
        mean: f64,
        stddev: f64,
    },
    Iqr {
        count: u64,
        q1: f64,
        median: f64,
        q3: f64,
    },
}

impl Statistics {
    /// The value outliers are ranked against.
    pub fn center(&self) -> f64 {
        match self {
            Self::ZScore { mean, .. } => *mean,
            Self::Iqr { median, .. } => *median,
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            Self::ZScore { count, .. } | Self::Iqr { count, .. } => *count,
        }
    }

    fn write_metadata(&self, metadata: &mut Map<String, Value>) {
        match *self {
            Self::ZScore { mean, stddev, .. } => {
                metadata.insert("mean".into(), json!(mean));
                metadata.insert("stddev".into(), json!(stddev));
            }
            Self::Iqr { q1, median, q3, .. } => {
                metadata.insert("q1".into(), json!(q1));
                metadata.insert("median".into(), json!(median));
                metadata.insert("q3".into(), json!(q3));
                metadata.insert("iqr".into(), json!(q3 - q1));
            }
        }
    }
}

/// Bounds outside of which a value is an outlier. A missing side is unchecked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bounds {
    fn new(lower: f64, upper: f64, direction: Direction) -> Self {
        Self {
            lower: matches!(direction, Direction::Both | Direction::Low).then_some(lower),
            upper: matches!(direction, Direction::Both | Direction::High).then_some(upper),
        }
    }

    /// Returns true if `value` lies outside the bounds.
    pub fn is_outlier(&self, value: f64) -> bool {
        self.lower.is_some_and(|l| value < l) || self.upper.is_some_and(|u| value > u)
    }
}

/// Outcome of a detection run.
#[derive(Debug, Clone, PartialEq)]
pub enum OutlierOutcome {
    /// Too few values or no spread; nothing can be called an outlier
    InsufficientData {
        non_null_count: u64,
        reason: String,
        /// Last aggregate query executed
        query: String,
    },
    Detected(Detection),
}

/// Counted and sampled outliers.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub statistics: Statistics,
    pub bounds: Bounds,
    pub violation_count: u64,
    /// Most extreme first
    pub samples: Vec<Row>,
    /// `SELECT *` over the rows outside the bounds
    pub query: String,
}

impl OutlierOutcome {
    /// Details for the result metadata.
    pub fn metadata(&self, method: &OutlierMethod, direction: Direction) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("method".into(), json!(method.name()));
        match method {
            OutlierMethod::ZScore { threshold } => {
                metadata.insert("threshold".into(), json!(threshold));
            }
            OutlierMethod::Iqr { multiplier } => {
                metadata.insert("multiplier".into(), json!(multiplier));
            }
        }
        metadata.insert("direction".into(), json!(direction.as_str()));

        match self {
            Self::InsufficientData {
                non_null_count,
                reason,
                ..
            } => {
                metadata.insert("non_null_count".into(), json!(non_null_count));
                metadata.insert("reason".into(), json!(reason));
            }
            Self::Detected(detection) => {
                metadata.insert(
                    "non_null_count".into(),
                    json!(detection.statistics.count()),
                );
                detection.statistics.write_metadata(&mut metadata);
                metadata.insert("lower_bound".into(), json!(detection.bounds.lower));
                metadata.insert("upper_bound".into(), json!(detection.bounds.upper));
            }
        }
        metadata
    }
}

/// Detects outliers in one numeric column of one table.
///
/// # Examples
///
/// ```rust
/// use dq_guard::analyzers::{Direction, OutlierAnalyzer, OutlierMethod, OutlierOutcome};
/// use dq_guard::sources::DataFusionSource;
/// use datafusion::arrow::array::Int64Array;
/// use datafusion::arrow::datatypes::{DataType, Field, Schema};
/// use datafusion::arrow::record_batch::RecordBatch;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> dq_guard::Result<()> {
/// let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
/// let values = Int64Array::from(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 100]);
/// let source = DataFusionSource::new("memory");
/// source.register_batch("t", RecordBatch::try_new(schema, vec![Arc::new(values)])?)?;
///
/// let analyzer = OutlierAnalyzer::new("t", "v", OutlierMethod::Iqr { multiplier: 1.5 }, Direction::Both)?;
/// match analyzer.run(&source, 5).await? {
///     OutlierOutcome::Detected(d) => assert_eq!(d.violation_count, 1),
///     other => panic!("unexpected {other:?}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct OutlierAnalyzer {
    table: String,
    column: String,
    method: OutlierMethod,
    direction: Direction,
}

impl OutlierAnalyzer {
    pub fn new(
        table: &str,
        column: &str,
        method: OutlierMethod,
        direction: Direction,
    ) -> Result<Self> {
        let parameter = match method {
            OutlierMethod::ZScore { threshold } => threshold,
            OutlierMethod::Iqr { multiplier } => multiplier,
        };
        if !parameter.is_finite() || parameter < 0.0 {
            return Err(GuardError::Configuration(format!(
                "{} parameter must be a non-negative number, got {parameter}",
                method.name()
            )));
        }
        Ok(Self {
            table: SqlSecurity::escape_identifier(table)?,
            column: SqlSecurity::escape_identifier(column)?,
            method,
            direction,
        })
    }

    pub fn method(&self) -> &OutlierMethod {
        &self.method
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn numeric(&self) -> String {
        format!("CAST({} AS DOUBLE)", self.column)
    }

    /// Runs both passes and samples at most `sample_size` outliers.
    #[instrument(
        skip(self, source),
        fields(table = %self.table, column = %self.column, method = self.method.name())
    )]
    pub async fn run(&self, source: &dyn DataSource, sample_size: usize) -> Result<OutlierOutcome> {
        let statistics = match self.method {
            OutlierMethod::ZScore { .. } => self.zscore_statistics(source).await?,
            OutlierMethod::Iqr { .. } => self.iqr_statistics(source).await?,
        };
        let statistics = match statistics {
            Ok(statistics) => statistics,
            Err(insufficient) => {
                debug!(?insufficient, "Insufficient data for outlier detection");
                return Ok(insufficient);
            }
        };

        let (lower, upper) = match (self.method, statistics) {
            (OutlierMethod::ZScore { threshold }, Statistics::ZScore { mean, stddev, .. }) => {
                zscore_bounds(mean, stddev, threshold)
            }
            (OutlierMethod::Iqr { multiplier }, Statistics::Iqr { q1, q3, .. }) => {
                iqr_bounds(q1, q3, multiplier)
            }
            _ => {
                return Err(GuardError::Internal(
                    "outlier statistics do not match the method".to_string(),
                ))
            }
        };
        let bounds = Bounds::new(lower, upper, self.direction);
        debug!(?statistics, ?bounds, "Derived outlier bounds");

        let predicate = self.predicate(&bounds);
        let counting = count_query(&self.table, &predicate);
        let rows = source.execute_query(&counting).await?;
        let violation_count = first_count(&rows, "violation_count").ok_or_else(|| {
            GuardError::query_execution(&counting, "count query returned no count column")
        })?;

        let samples = if violation_count > 0 && sample_size > 0 {
            let extra = match statistics {
                Statistics::ZScore { mean, stddev, .. } => format!(
                    ", ({} - {}) / {} AS _zscore",
                    self.numeric(),
                    sql_number(mean),
                    sql_number(stddev)
                ),
                Statistics::Iqr { .. } => String::new(),
            };
            let sample_query = format!(
                "SELECT *{extra} FROM {} WHERE {predicate} ORDER BY ABS({} - {}) DESC LIMIT {sample_size}",
                self.table,
                self.numeric(),
                sql_number(statistics.center())
            );
            public_columns(source.execute_query(&sample_query).await?)
        } else {
            Vec::new()
        };

        Ok(OutlierOutcome::Detected(Detection {
            statistics,
            bounds,
            violation_count,
            samples,
            query: selection_query(&self.table, &predicate),
        }))
    }

    /// SQL predicate matching non-NULL values outside `bounds`.
    pub fn predicate(&self, bounds: &Bounds) -> String {
        let value = self.numeric();
        let mut sides = Vec::with_capacity(2);
        if let Some(lower) = bounds.lower {
            sides.push(format!("{value} < {}", sql_number(lower)));
        }
        if let Some(upper) = bounds.upper {
            sides.push(format!("{value} > {}", sql_number(upper)));
        }
        if sides.is_empty() {
            return "1 = 0".to_string();
        }
        format!("{} IS NOT NULL AND ({})", self.column, sides.join(" OR "))
    }

    async fn zscore_statistics(
        &self,
        source: &dyn DataSource,
    ) -> Result<std::result::Result<Statistics, OutlierOutcome>> {
        let value = self.numeric();
        let moments_query = format!(
            "SELECT COUNT({}) AS n, AVG({value}) AS mean FROM {}",
            self.column, self.table
        );
        let rows = source.execute_query(&moments_query).await?;
        let count = first_count(&rows, "n").ok_or_else(|| {
            GuardError::query_execution(&moments_query, "aggregate query returned no count")
        })?;
        if count < 2 {
            return Ok(Err(insufficient(count, moments_query)));
        }
        let mean = rows
            .first()
            .and_then(|row| row.get("mean"))
            .and_then(value_as_f64)
            .filter(|m| m.is_finite())
            .ok_or_else(|| {
                GuardError::query_execution(&moments_query, "aggregate query returned no mean")
            })?;

        let deviation = format!("({value} - {})", sql_number(mean));
        let spread_query = format!(
            "SELECT SUM({deviation} * {deviation}) AS ss FROM {} WHERE {} IS NOT NULL",
            self.table, self.column
        );
        let rows = source.execute_query(&spread_query).await?;
        let sum_sq = rows
            .first()
            .and_then(|row| row.get("ss"))
            .and_then(value_as_f64)
            .unwrap_or(0.0);

        match sample_stddev(count, sum_sq) {
            Some(stddev) if stddev > f64::EPSILON * mean.abs().max(1.0) => {
                Ok(Ok(Statistics::ZScore {
                    count,
                    mean,
                    stddev,
                }))
            }
            _ => Ok(Err(OutlierOutcome::InsufficientData {
                non_null_count: count,
                reason: "standard deviation is zero".to_string(),
                query: spread_query,
            })),
        }
    }

    async fn iqr_statistics(
        &self,
        source: &dyn DataSource,
    ) -> Result<std::result::Result<Statistics, OutlierOutcome>> {
        let count_sql = format!("SELECT COUNT({}) AS n FROM {}", self.column, self.table);
        let rows = source.execute_query(&count_sql).await?;
        let count = first_count(&rows, "n").ok_or_else(|| {
            GuardError::query_execution(&count_sql, "aggregate query returned no count")
        })?;
        if count < 2 {
            return Ok(Err(insufficient(count, count_sql)));
        }

        let q1 = self.quantile(source, 0.25, count).await?;
        let median = self.quantile(source, 0.5, count).await?;
        let q3 = self.quantile(source, 0.75, count).await?;
        Ok(Ok(Statistics::Iqr {
            count,
            q1,
            median,
            q3,
        }))
    }

    /// Continuous percentile by reading the two neighbouring ranks.
    async fn quantile(&self, source: &dyn DataSource, p: f64, count: u64) -> Result<f64> {
        let (offset, fraction) = quantile_position(p, count);
        let query = format!(
            "SELECT {} AS v FROM {} WHERE {} IS NOT NULL ORDER BY v LIMIT 2 OFFSET {offset}",
            self.numeric(),
            self.table,
            self.column
        );
        let rows = source.execute_query(&query).await?;
        let mut values = rows.iter().filter_map(|row| row.get("v").and_then(value_as_f64));
        let low = values.next().ok_or_else(|| {
            GuardError::query_execution(&query, format!("no value at rank {offset}"))
        })?;
        let high = values.next().unwrap_or(low);
        Ok(interpolate(low, high, fraction))
    }
}

/// Renames the computed `_zscore` column to `zscore` and drops other
/// underscore-prefixed helper columns.
fn public_columns(rows: Vec<Row>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .filter_map(|(key, value)| match key.as_str() {
                    "_zscore" => Some(("zscore".to_string(), value)),
                    k if k.starts_with('_') => None,
                    _ => Some((key, value)),
                })
                .collect()
        })
        .collect()
}

fn insufficient(count: u64, query: String) -> OutlierOutcome {
    let reason = if count == 0 {
        "no non-NULL values"
    } else {
        "fewer than 2 non-NULL values"
    };
    OutlierOutcome::InsufficientData {
        non_null_count: count,
        reason: reason.to_string(),
        query,
    }
}

/// Sample standard deviation from `n` values and their summed squared
/// deviations. `None` below two values.
pub fn sample_stddev(n: u64, sum_squared_deviations: f64) -> Option<f64> {
    if n < 2 {
        return None;
    }
    Some((sum_squared_deviations.max(0.0) / (n - 1) as f64).sqrt())
}

/// `(mean - t·sd, mean + t·sd)`.
pub fn zscore_bounds(mean: f64, stddev: f64, threshold: f64) -> (f64, f64) {
    (mean - threshold * stddev, mean + threshold * stddev)
}

/// `(q1 - m·iqr, q3 + m·iqr)`.
pub fn iqr_bounds(q1: f64, q3: f64, multiplier: f64) -> (f64, f64) {
    let iqr = q3 - q1;
    (q1 - multiplier * iqr, q3 + multiplier * iqr)
}

/// Zero-based rank and interpolation fraction of percentile `p` among `n`
/// sorted values.
pub fn quantile_position(p: f64, n: u64) -> (u64, f64) {
    if n == 0 {
        return (0, 0.0);
    }
    let position = p.clamp(0.0, 1.0) * (n - 1) as f64;
    let offset = position.floor();
    (offset as u64, position - offset)
}

pub fn interpolate(low: f64, high: f64, fraction: f64) -> f64 {
    low + fraction * (high - low)
}

/// Continuous percentile of already sorted values.
pub fn percentile_cont(sorted: &[f64], p: f64) -> Option<f64> {
    let (offset, fraction) = quantile_position(p, sorted.len() as u64);
    let low = *sorted.get(offset as usize)?;
    let high = sorted.get(offset as usize + 1).copied().unwrap_or(low);
    Some(interpolate(low, high, fraction))
}
