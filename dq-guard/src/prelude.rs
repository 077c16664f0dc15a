//! Commonly used types and traits.

pub use crate::config::RunConfig;
pub use crate::core::{
    RuleSpec, RuleStatus, RunSettings, RunState, Severity, ValidationReport, ValidationResult,
};
pub use crate::engine::{Engine, ProgressEvent};
pub use crate::error::{ErrorContext, GuardError, Result};
pub use crate::formatters::{FormatterConfig, JsonFormatter, ResultFormatter, SummaryFormatter};
pub use crate::logging::LogConfig;
pub use crate::sources::{DataFusionSource, DataSource};
pub use crate::validators::{Evaluation, Validator, ValidatorRegistry};
