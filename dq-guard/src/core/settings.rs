//! Run-level settings.

use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings that apply to a whole run.
///
/// # Examples
///
/// ```rust
/// use dq_guard::core::RunSettings;
///
/// let settings = RunSettings::default()
///     .with_stop_on_critical(true)
///     .with_max_workers(2);
/// assert_eq!(settings.sample_size, 5);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Skip not-yet-started rules once a critical rule fails
    pub stop_on_critical: bool,
    /// Default number of violating rows captured per rule
    pub sample_size: usize,
    /// Run rules on a worker pool; when false, rules run inline in order
    pub parallel_execution: bool,
    /// Size of the worker pool
    pub max_workers: usize,
    /// Optional per-rule evaluation limit in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_timeout_ms: Option<u64>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            stop_on_critical: false,
            sample_size: 5,
            parallel_execution: true,
            max_workers: 4,
            rule_timeout_ms: None,
        }
    }
}

impl RunSettings {
    /// Settings for strictly sequential execution on one connection.
    pub fn sequential() -> Self {
        Self {
            parallel_execution: false,
            max_workers: 1,
            ..Self::default()
        }
    }

    pub fn with_stop_on_critical(mut self, enabled: bool) -> Self {
        self.stop_on_critical = enabled;
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_parallel_execution(mut self, enabled: bool) -> Self {
        self.parallel_execution = enabled;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_rule_timeout(mut self, timeout: Duration) -> Self {
        self.rule_timeout_ms = Some(timeout.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// The per-rule timeout, if any.
    pub fn rule_timeout(&self) -> Option<Duration> {
        self.rule_timeout_ms.map(Duration::from_millis)
    }

    /// Number of workers actually used for `rule_count` rules.
    pub fn effective_workers(&self, rule_count: usize) -> usize {
        if !self.parallel_execution {
            return 1;
        }
        self.max_workers.min(rule_count).max(1)
    }

    /// Checks the settings before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(GuardError::configuration("max_workers must be at least 1"));
        }
        if self.rule_timeout_ms == Some(0) {
            return Err(GuardError::configuration(
                "rule_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RunSettings::default();
        assert!(!settings.stop_on_critical);
        assert_eq!(settings.sample_size, 5);
        assert!(settings.parallel_execution);
        assert_eq!(settings.max_workers, 4);
        assert_eq!(settings.rule_timeout(), None);
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let settings: RunSettings =
            serde_json::from_str(r#"{"stop_on_critical": true, "max_workers": 8}"#).unwrap();
        assert!(settings.stop_on_critical);
        assert_eq!(settings.max_workers, 8);
        assert_eq!(settings.sample_size, 5);
        assert!(settings.parallel_execution);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = RunSettings::default().with_max_workers(0).validate().unwrap_err();
        assert!(err.is_fatal_configuration());
    }

    #[test]
    fn test_effective_workers() {
        let settings = RunSettings::default().with_max_workers(4);
        assert_eq!(settings.effective_workers(10), 4);
        assert_eq!(settings.effective_workers(2), 2);
        assert_eq!(settings.effective_workers(0), 1);
        assert_eq!(RunSettings::sequential().effective_workers(10), 1);
        assert_eq!(
            RunSettings::default()
                .with_parallel_execution(false)
                .effective_workers(10),
            1
        );
    }

    #[test]
    fn test_rule_timeout() {
        let settings = RunSettings::default().with_rule_timeout(Duration::from_millis(250));
        assert_eq!(settings.rule_timeout(), Some(Duration::from_millis(250)));
    }
}
