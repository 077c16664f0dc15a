//! Validator dispatch.
//!
//! A [`Validator`] is built from a [`RuleSpec`] by a factory registered under
//! the rule's type. Construction checks the type-specific parameters, so a
//! malformed rule fails before any query is issued. Evaluation counts the
//! violations first and then fetches a bounded sample of them.
//!
//! | type | checks |
//! |---|---|
//! | `completeness` | NULL (and optionally empty or blank) values |
//! | `referential_integrity` | keys missing from the reference table |
//! | `duplicates` / `uniqueness` | excess rows in duplicate groups |
//! | `range` / `date_range` | values outside `[min, max]` |
//! | `pattern` | values not matching a regex |
//! | `cross_field` | rows violating a boolean expression |
//! | `outliers` | z-score or IQR outliers |
//! | `custom_sql` | rows returned by a caller's query |

mod completeness;
mod custom_sql;
mod duplicates;
mod expression;
mod outliers;
mod pattern;
mod range;
mod referential;
pub(crate) mod sql;

pub use completeness::CompletenessValidator;
pub use custom_sql::CustomSqlValidator;
pub use duplicates::DuplicatesValidator;
pub use expression::CrossFieldValidator;
pub use outliers::OutliersValidator;
pub use pattern::{named_pattern, PatternValidator, NAMED_PATTERNS};
pub use range::RangeValidator;
pub use referential::ReferentialIntegrityValidator;

use crate::core::{RuleSpec, RuleStatus, ValidationResult};
use crate::error::{GuardError, Result};
use crate::sources::{DataSource, Row};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// A configured check for one rule.
///
/// Implementations hold quoted identifiers and parsed parameters; they are
/// stateless across evaluations.
#[async_trait]
pub trait Validator: Debug + Send + Sync {
    /// The type tag this validator was built for.
    fn rule_type(&self) -> &str;

    /// Counts violations and samples at most `sample_size` of them.
    async fn evaluate(&self, source: &dyn DataSource, sample_size: usize) -> Result<Evaluation>;
}

/// What a validator found.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub violation_count: u64,
    pub sample_records: Vec<Row>,
    /// The check query, reported with the result
    pub query: Option<String>,
    pub status: RuleStatus,
    pub metadata: Map<String, Value>,
}

impl Evaluation {
    /// An evaluated check with `violation_count` violations.
    pub fn new(violation_count: u64, query: impl Into<String>) -> Self {
        Self {
            violation_count,
            sample_records: Vec::new(),
            query: Some(query.into()),
            status: RuleStatus::Ok,
            metadata: Map::new(),
        }
    }

    /// A check that could not decide for lack of data.
    pub fn insufficient_data(query: impl Into<String>) -> Self {
        Self {
            status: RuleStatus::InsufficientData,
            ..Self::new(0, query)
        }
    }

    pub fn with_samples(mut self, samples: Vec<Row>) -> Self {
        self.sample_records = samples;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata_map(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Turns the evaluation into the rule's result.
    pub(crate) fn into_result(
        self,
        rule: &RuleSpec,
        sample_size: usize,
        duration: Duration,
    ) -> ValidationResult {
        let mut sample_records = self.sample_records;
        sample_records.truncate(sample_size);

        let mut result = ValidationResult::for_rule(rule, self.status);
        let violation_count = match self.status {
            RuleStatus::InsufficientData => 0,
            _ => self.violation_count,
        };
        result.violation_count = violation_count;
        result.passed = violation_count == 0;
        if violation_count > 0 {
            result.sample_records = sample_records;
        }
        result.query = self.query;
        result.metadata = self.metadata;
        result.duration = duration;
        result
    }
}

/// Builds a validator from a rule, or rejects its parameters.
pub type ValidatorFactory = Arc<dyn Fn(&RuleSpec) -> Result<Box<dyn Validator>> + Send + Sync>;

/// Mapping from rule type to validator factory.
///
/// The registry is built once and handed to the engine; callers can add
/// their own kinds next to the built-in ones.
///
/// # Examples
///
/// ```rust
/// use dq_guard::validators::ValidatorRegistry;
///
/// let registry = ValidatorRegistry::builtin();
/// assert!(registry.contains("outliers"));
/// assert!(registry.contains("Completeness"));
/// assert!(!registry.contains("freshness"));
/// ```
#[derive(Clone)]
pub struct ValidatorRegistry {
    factories: HashMap<String, ValidatorFactory>,
}

impl ValidatorRegistry {
    /// A registry with no validators.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every built-in validator.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("completeness", |rule| {
            Ok(Box::new(CompletenessValidator::from_rule(rule)?))
        });
        registry.register("referential_integrity", |rule| {
            Ok(Box::new(ReferentialIntegrityValidator::from_rule(rule)?))
        });
        registry.register("duplicates", |rule| {
            Ok(Box::new(DuplicatesValidator::from_rule(rule)?))
        });
        registry.register("uniqueness", |rule| {
            Ok(Box::new(DuplicatesValidator::uniqueness_from_rule(rule)?))
        });
        registry.register("range", |rule| Ok(Box::new(RangeValidator::from_rule(rule)?)));
        registry.register("date_range", |rule| {
            Ok(Box::new(RangeValidator::dates_from_rule(rule)?))
        });
        registry.register("pattern", |rule| {
            Ok(Box::new(PatternValidator::from_rule(rule)?))
        });
        registry.register("cross_field", |rule| {
            Ok(Box::new(CrossFieldValidator::from_rule(rule)?))
        });
        registry.register("outliers", |rule| {
            Ok(Box::new(OutliersValidator::from_rule(rule)?))
        });
        registry.register("custom_sql", |rule| {
            Ok(Box::new(CustomSqlValidator::from_rule(rule)?))
        });
        registry
    }

    /// Registers `factory` under `rule_type`, replacing any previous one.
    ///
    /// Type tags are case-insensitive.
    pub fn register<F>(&mut self, rule_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&RuleSpec) -> Result<Box<dyn Validator>> + Send + Sync + 'static,
    {
        self.factories
            .insert(rule_type.into().to_ascii_lowercase(), Arc::new(factory));
        self
    }

    pub fn contains(&self, rule_type: &str) -> bool {
        self.factories.contains_key(&rule_type.to_ascii_lowercase())
    }

    /// Registered types, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Builds the validator for `rule`.
    pub fn create(&self, rule: &RuleSpec) -> Result<Box<dyn Validator>> {
        let factory = self
            .factories
            .get(&rule.rule_type.to_ascii_lowercase())
            .ok_or_else(|| {
                GuardError::Configuration(format!(
                    "unknown rule type '{}' for rule '{}'",
                    rule.rule_type,
                    rule.name()
                ))
            })?;
        factory(rule)
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("types", &self.types())
            .finish()
    }
}

/// Evaluates one rule against `source`.
///
/// Parameter and query failures become an `error` result. A lost
/// connection is returned as `Err` so the scheduler can stop handing out
/// work on the broken source.
#[instrument(
    skip(registry, rule, source),
    fields(rule = %rule.name(), rule_type = %rule.rule_type)
)]
pub async fn dispatch(
    registry: &ValidatorRegistry,
    rule: &RuleSpec,
    source: &dyn DataSource,
    default_sample_size: usize,
) -> Result<ValidationResult> {
    let started = Instant::now();
    let sample_size = rule.sample_size.unwrap_or(default_sample_size);

    let validator = match registry.create(rule) {
        Ok(validator) => validator,
        Err(e) => {
            debug!(error = %e, "Rule rejected before evaluation");
            return Ok(ValidationResult::error(rule, e.to_string(), None, started.elapsed()));
        }
    };

    match validator.evaluate(source, sample_size).await {
        Ok(evaluation) => {
            let result = evaluation.into_result(rule, sample_size, started.elapsed());
            debug!(
                violations = result.violation_count,
                status = %result.status,
                "Rule evaluated"
            );
            Ok(result)
        }
        Err(e) if e.is_connection() => Err(e),
        Err(e) => {
            let query = e.query().map(str::to_string);
            Ok(ValidationResult::error(rule, e.to_string(), query, started.elapsed()))
        }
    }
}
