//! The execution engine.
//!
//! An [`Engine`] owns a validator registry and run settings. Each call to
//! [`Engine::run`] checks the rule set, evaluates the rules on a bounded
//! worker pool and returns a [`ValidationReport`] in declaration order.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dq_guard::core::{RuleSpec, RunSettings, Severity};
//! use dq_guard::engine::Engine;
//! use dq_guard::sources::DataFusionSource;
//! use std::sync::Arc;
//!
//! # async fn example() -> dq_guard::Result<()> {
//! let source = DataFusionSource::new("warehouse");
//! source.register_csv("customers", "data/customers.csv").await?;
//!
//! let engine = Engine::builder()
//!     .settings(RunSettings::default().with_stop_on_critical(true))
//!     .build();
//! let rules = vec![RuleSpec::new("emails_present", "completeness", Severity::Critical)
//!     .on_table("customers")
//!     .columns(["email"])];
//!
//! let report = engine.run(rules, Arc::new(source)).await?;
//! println!("{} of {} rules passed", report.passed_count(), report.total());
//! # Ok(())
//! # }
//! ```

mod aggregator;
mod progress;
mod scheduler;

pub use aggregator::ResultAggregator;
pub use progress::{ProgressEvent, ProgressSender};

use crate::core::{RuleSet, RuleSpec, RunSettings, Severity, ValidationReport, ValidationResult};
use crate::error::Result;
use crate::logging::LogConfig;
use crate::sources::DataSource;
use crate::validators::{dispatch, ValidatorRegistry};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// What a rule would do, without running it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulePreview {
    pub name: String,
    pub rule_type: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Runs rule sets against data sources.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    registry: ValidatorRegistry,
    settings: RunSettings,
    log: LogConfig,
    progress: Option<ProgressSender>,
}

impl Engine {
    /// An engine with the built-in validators and default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Runs `rules` against `source`.
    ///
    /// Returns `Err` only for configuration errors (duplicate rule names,
    /// unknown validator types, invalid settings); nothing is executed in
    /// that case. Every other failure is recorded on its rule's result.
    #[instrument(skip_all, fields(rules = rules.len()))]
    pub async fn run(
        &self,
        rules: Vec<RuleSpec>,
        source: Arc<dyn DataSource>,
    ) -> Result<ValidationReport> {
        self.settings.validate()?;
        let rules = RuleSet::new(rules, &self.registry)?;
        scheduler::execute(
            rules,
            self.registry.clone(),
            self.settings.clone(),
            self.log.clone(),
            source,
            self.progress.clone(),
        )
        .await
    }

    /// Checks `rules` and describes them without touching any data source.
    pub fn dry_run(&self, rules: Vec<RuleSpec>) -> Result<Vec<RulePreview>> {
        self.settings.validate()?;
        let rules = RuleSet::new(rules, &self.registry)?;
        Ok(rules
            .iter()
            .map(|rule| RulePreview {
                name: rule.name().to_string(),
                rule_type: rule.rule_type.clone(),
                severity: rule.severity,
                table: rule.table.clone(),
                description: rule.description.clone(),
            })
            .collect())
    }

    /// Evaluates one rule against an already connected source.
    ///
    /// Connection loss is returned as `Err` here since there is no run to
    /// fold it into.
    pub async fn run_single(
        &self,
        rule: &RuleSpec,
        source: &dyn DataSource,
    ) -> Result<ValidationResult> {
        let rules = RuleSet::new(vec![rule.clone()], &self.registry)?;
        let rule = &rules[0];
        dispatch(&self.registry, rule, source, self.settings.sample_size).await
    }
}

/// Builder for [`Engine`].
#[derive(Debug, Default)]
pub struct EngineBuilder {
    registry: Option<ValidatorRegistry>,
    settings: RunSettings,
    log: LogConfig,
    progress: Option<ProgressSender>,
}

impl EngineBuilder {
    /// Replaces the built-in validators.
    pub fn registry(mut self, registry: ValidatorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Detail of the engine's per-rule log events.
    pub fn log_config(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Reports one [`ProgressEvent`] per finished or skipped rule.
    pub fn progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            registry: self.registry.unwrap_or_default(),
            settings: self.settings,
            log: self.log,
            progress: self.progress,
        }
    }
}

/// Runs `rules` against `source` with the built-in validators.
///
/// Shorthand for `Engine::builder().settings(settings).build().run(..)`.
pub async fn run(
    rules: Vec<RuleSpec>,
    source: Arc<dyn DataSource>,
    settings: RunSettings,
) -> Result<ValidationReport> {
    Engine::builder().settings(settings).build().run(rules, source).await
}
