//! Collects results in completion order and emits them in declaration order.

use crate::core::{RunSettings, RunState, ValidationReport, ValidationResult};
use crate::error::{GuardError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Slots for one run's results, indexed by declaration position.
///
/// Every declared rule must report exactly once; recording a slot twice or
/// finalizing with empty slots is a programming error.
#[derive(Debug)]
pub struct ResultAggregator {
    slots: Vec<Option<ValidationResult>>,
    completed: usize,
}

impl ResultAggregator {
    pub fn new(total: usize) -> Self {
        Self {
            slots: (0..total).map(|_| None).collect(),
            completed: 0,
        }
    }

    /// Stores the result of the rule declared at `index`.
    pub fn record(&mut self, index: usize, result: ValidationResult) -> Result<()> {
        let total = self.slots.len();
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            GuardError::Internal(format!("result index {index} out of range for {total} rules"))
        })?;
        if let Some(existing) = slot {
            return Err(GuardError::Internal(format!(
                "rule '{}' reported more than once",
                existing.rule_name
            )));
        }
        *slot = Some(result);
        self.completed += 1;
        Ok(())
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.slots.len()
    }

    /// Seals the report.
    pub fn finalize(
        self,
        connection: &str,
        started_at: DateTime<Utc>,
        duration: Duration,
        state: RunState,
        settings: RunSettings,
    ) -> Result<ValidationReport> {
        if !state.is_terminal() {
            return Err(GuardError::Internal(format!(
                "cannot finalize a report in state {state:?}"
            )));
        }
        let missing: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.is_none().then_some(i))
            .collect();
        if !missing.is_empty() {
            return Err(GuardError::Internal(format!(
                "{} of {} rules produced no result (indices {missing:?})",
                missing.len(),
                self.slots.len()
            )));
        }

        let results = self.slots.into_iter().flatten().collect();
        Ok(ValidationReport::new(
            connection, started_at, duration, state, settings, results,
        ))
    }
}
