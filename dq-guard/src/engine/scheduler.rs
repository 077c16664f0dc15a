//! Bounded worker pool over one run's rule list.
//!
//! Workers pull the next not-yet-started rule from a shared cursor, so rules
//! start in declaration order while finishing in any order. The stop flag is
//! read between evaluations only; an evaluation in flight always runs to
//! completion. With `parallel_execution` disabled the same worker loop runs
//! inline on the caller's task against the single source handle.

use super::aggregator::ResultAggregator;
use super::progress::{ProgressEvent, ProgressSender};
use crate::core::{
    RuleSet, RuleSpec, RuleStatus, RunSettings, RunState, ValidationReport, ValidationResult,
};
use crate::error::{GuardError, Result};
use crate::logging::LogConfig;
use crate::sources::{DataSource, SessionMode};
use crate::validators::{dispatch, ValidatorRegistry};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn, Level};

type Completed = (usize, ValidationResult);

/// State shared by the workers of one run.
#[derive(Debug)]
struct RunContext {
    rules: RuleSet,
    registry: ValidatorRegistry,
    settings: RunSettings,
    log: LogConfig,
    cursor: AtomicUsize,
    stop: AtomicBool,
    connection_lost: Mutex<Option<String>>,
    state: Mutex<RunState>,
}

impl RunContext {
    fn new(
        rules: RuleSet,
        registry: ValidatorRegistry,
        settings: RunSettings,
        log: LogConfig,
    ) -> Self {
        Self {
            rules,
            registry,
            settings,
            log,
            cursor: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            connection_lost: Mutex::new(None),
            state: Mutex::new(RunState::Pending),
        }
    }

    fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn advance(&self, next: RunState) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !state.can_transition_to(next) {
            return Err(GuardError::Internal(format!(
                "invalid run state transition from {:?} to {next:?}",
                *state
            )));
        }
        debug!(from = ?*state, to = ?next, "Run state changed");
        *state = next;
        Ok(())
    }

    fn lost_connection(&self) -> Option<String> {
        self.connection_lost
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record_connection_loss(&self, message: &str) {
        let mut lost = self
            .connection_lost
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if lost.is_none() {
            error!(error = %message, "Connection lost; remaining rules will not start");
            *lost = Some(message.to_string());
        }
    }

    /// Evaluates one rule, folding timeouts, panics and connection loss into
    /// an error result.
    async fn evaluate(&self, rule: &RuleSpec, source: &dyn DataSource) -> ValidationResult {
        let started = Instant::now();
        let evaluation =
            AssertUnwindSafe(dispatch(&self.registry, rule, source, self.settings.sample_size))
                .catch_unwind();

        let outcome = match self.settings.rule_timeout() {
            Some(limit) => match tokio::time::timeout(limit, evaluation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = GuardError::Timeout {
                        rule: rule.name().to_string(),
                        after: limit,
                    };
                    return ValidationResult::error(rule, err.to_string(), None, started.elapsed());
                }
            },
            None => evaluation.await,
        };

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                if e.is_connection() {
                    self.record_connection_loss(&e.to_string());
                }
                ValidationResult::error(rule, e.to_string(), None, started.elapsed())
            }
            Err(panic) => ValidationResult::error(
                rule,
                format!("validator panicked: {}", panic_message(panic.as_ref())),
                None,
                started.elapsed(),
            ),
        }
    }

    fn trip_critical_stop(&self, result: &ValidationResult) {
        if self.settings.stop_on_critical
            && result.is_critical_failure()
            && !self.stop.swap(true, Ordering::SeqCst)
        {
            warn!(
                rule = %result.rule_name,
                "Critical rule failed; rules not yet started will be skipped"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Takes rules off the shared cursor until none are left.
async fn worker(
    ctx: Arc<RunContext>,
    source: Arc<dyn DataSource>,
    results: mpsc::UnboundedSender<Completed>,
) {
    loop {
        let index = ctx.cursor.fetch_add(1, Ordering::SeqCst);
        let Some(rule) = ctx.rules.get(index) else {
            break;
        };

        let result = if ctx.stop.load(Ordering::SeqCst) {
            ValidationResult::skipped(rule)
        } else if let Some(message) = ctx.lost_connection() {
            ValidationResult::error(
                rule,
                format!("Connection lost before rule started: {message}"),
                None,
                std::time::Duration::ZERO,
            )
        } else {
            let result = ctx.evaluate(rule, source.as_ref()).await;
            ctx.trip_critical_stop(&result);
            result
        };

        if results.send((index, result)).is_err() {
            break;
        }
    }
}

/// Receives results in completion order until every worker has finished.
async fn collect(
    mut results: mpsc::UnboundedReceiver<Completed>,
    total: usize,
    progress: Option<&ProgressSender>,
    log: &LogConfig,
) -> Result<ResultAggregator> {
    let mut aggregator = ResultAggregator::new(total);
    while let Some((index, result)) = results.recv().await {
        log_result(&result, log);
        let event = ProgressEvent::new(index, &result, aggregator.completed() + 1, total);
        aggregator.record(index, result)?;
        if let Some(sender) = progress {
            // a dropped receiver only means nobody is watching
            let _ = sender.send(event);
        }
    }
    Ok(aggregator)
}

fn log_result(result: &ValidationResult, log: &LogConfig) {
    let query = log.query_field(result.query.as_deref());
    match result.status {
        RuleStatus::Error if log.enabled(Level::ERROR) => error!(
            rule = %result.rule_name,
            error = result.error_message.as_deref().unwrap_or_default(),
            query = query.as_deref(),
            "Rule could not be evaluated"
        ),
        RuleStatus::Error => {}
        RuleStatus::Skipped if log.enabled(Level::DEBUG) => {
            debug!(rule = %result.rule_name, "Rule skipped")
        }
        RuleStatus::Skipped => {}
        _ if result.passed => {
            if log.log_rule_details && log.enabled(Level::DEBUG) {
                debug!(
                    rule = %result.rule_name,
                    status = %result.status,
                    duration_ms = result.duration.as_millis() as u64,
                    "Rule passed"
                );
            }
        }
        _ if log.enabled(Level::WARN) => warn!(
            rule = %result.rule_name,
            severity = %result.severity,
            violations = result.violation_count,
            query = query.as_deref(),
            "Rule failed"
        ),
        _ => {}
    }
}

/// Opens one session per worker, closing any already opened if one fails.
async fn open_sessions(source: &dyn DataSource, count: usize) -> Result<Vec<Arc<dyn DataSource>>> {
    let mut sessions = Vec::with_capacity(count);
    for _ in 0..count {
        match source.open_session().await {
            Ok(session) => sessions.push(session),
            Err(e) => {
                close_all(&sessions).await;
                return Err(e);
            }
        }
    }
    Ok(sessions)
}

async fn close_all(sessions: &[Arc<dyn DataSource>]) {
    for session in sessions {
        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close worker session");
        }
    }
}

/// Runs `rules` against `source` and seals the report.
///
/// The source is connected first and left open for the caller; only the
/// worker sessions opened here are closed. A failed connect or session setup
/// marks every rule as an error; the run still produces a full report.
#[instrument(skip_all, fields(connection = %source.name(), rules = rules.len()))]
pub(crate) async fn execute(
    rules: RuleSet,
    registry: ValidatorRegistry,
    settings: RunSettings,
    log: LogConfig,
    source: Arc<dyn DataSource>,
    progress: Option<ProgressSender>,
) -> Result<ValidationReport> {
    settings.validate()?;

    let started_at = Utc::now();
    let clock = Instant::now();
    let total = rules.len();
    let workers = settings.effective_workers(total);
    info!(
        total,
        workers,
        parallel = settings.parallel_execution,
        stop_on_critical = settings.stop_on_critical,
        "Starting validation run"
    );

    let ctx = Arc::new(RunContext::new(rules, registry, settings, log));

    let (tx, rx) = mpsc::unbounded_channel();
    let setup = match source.connect().await {
        Ok(()) if ctx.settings.parallel_execution
            && source.session_mode() == SessionMode::PerWorker =>
        {
            open_sessions(source.as_ref(), workers).await.map(Some)
        }
        Ok(()) => Ok(None),
        Err(e) => Err(e),
    };
    ctx.advance(RunState::Running)?;

    let aggregator = match setup {
        Err(e) => {
            error!(error = %e, "Could not reach the data source; no rule will run");
            let message = e.to_string();
            for (index, rule) in ctx.rules.iter().enumerate() {
                let result =
                    ValidationResult::error(rule, message.clone(), None, std::time::Duration::ZERO);
                // the receiver is still held below
                let _ = tx.send((index, result));
            }
            drop(tx);
            collect(rx, total, progress.as_ref(), &ctx.log).await?
        }
        Ok(None) if !ctx.settings.parallel_execution => {
            debug!("Running rules sequentially");
            let (aggregator, ()) = tokio::join!(
                collect(rx, total, progress.as_ref(), &ctx.log),
                worker(Arc::clone(&ctx), Arc::clone(&source), tx)
            );
            aggregator?
        }
        Ok(sessions) => {
            let mut pool = JoinSet::new();
            for id in 0..workers {
                let session = sessions.as_ref().and_then(|s| s.get(id).cloned());
                let ctx = Arc::clone(&ctx);
                let tx = tx.clone();
                let handle = session.clone().unwrap_or_else(|| Arc::clone(&source));
                pool.spawn(async move {
                    worker(ctx, handle, tx).await;
                    if let Some(session) = session {
                        if let Err(e) = session.close().await {
                            warn!(worker = id, error = %e, "Failed to close worker session");
                        }
                    }
                });
            }
            drop(tx);

            let aggregator = collect(rx, total, progress.as_ref(), &ctx.log).await;
            while let Some(joined) = pool.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Worker task failed");
                }
            }
            aggregator?
        }
    };

    ctx.advance(if ctx.stop.load(Ordering::SeqCst) {
        RunState::CriticallyStopped
    } else {
        RunState::Completed
    })?;
    let report = aggregator.finalize(
        source.name(),
        started_at,
        clock.elapsed(),
        ctx.state(),
        ctx.settings.clone(),
    )?;

    let summary = report.summary();
    info!(
        total = summary.total,
        passed = summary.passed,
        failed = summary.failed,
        errors = summary.errors,
        skipped = summary.skipped,
        state = ?report.state(),
        duration_ms = report.run_duration().as_millis() as u64,
        "Validation run finished"
    );
    Ok(report)
}
