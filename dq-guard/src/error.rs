//! Error types for the dq-guard rule engine.
//!
//! All fallible operations return [`GuardError`]. Only
//! [`GuardError::Configuration`] is allowed to abort a run; every other
//! variant is isolated to the rule that produced it and recorded on that
//! rule's [`ValidationResult`](crate::core::ValidationResult).

use std::time::Duration;
use thiserror::Error;

/// The main error type for the dq-guard library.
#[derive(Error, Debug)]
pub enum GuardError {
    /// The rule set or run settings are malformed (duplicate names, unknown
    /// validator type, invalid worker count). Detected before execution.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A single rule is missing or has invalid type-specific parameters.
    #[error("Invalid rule '{rule}': {message}")]
    ValidatorConfig {
        /// Name of the offending rule
        rule: String,
        /// What is wrong with it
        message: String,
    },

    /// The data source rejected a query (syntax, permission, type errors).
    #[error("Query execution failed: {message}")]
    QueryExecution {
        /// The query text that failed
        query: String,
        /// Detailed error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The data source is unreachable or the connection was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A rule exceeded its configured evaluation timeout.
    #[error("Rule '{rule}' timed out after {after:?}")]
    Timeout {
        /// Name of the rule
        rule: String,
        /// The configured limit
        after: Duration,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Security-related error (unsafe identifier or statement).
    #[error("Security error: {0}")]
    Security(String),

    /// Error when an operation is not supported by a backend.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, GuardError>`.
pub type Result<T> = std::result::Result<T, GuardError>;

impl GuardError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a validator configuration error for the named rule.
    pub fn validator_config(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidatorConfig {
            rule: rule.into(),
            message: message.into(),
        }
    }

    /// Creates a query execution error.
    pub fn query_execution(query: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueryExecution {
            query: query.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a query execution error with a source error.
    pub fn query_execution_with_source(
        query: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::QueryExecution {
            query: query.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Returns true if this error means the data source is gone for the rest of the run.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Returns true if this error must abort the whole run.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// The query text attached to this error, if any.
    pub fn query(&self) -> Option<&str> {
        match self {
            Self::QueryExecution { query, .. } => Some(query),
            _ => None,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> Result<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<GuardError>,
{
    fn context(self, msg: &str) -> Result<T> {
        self.with_context(|| msg.to_string())
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let msg = f();
            match e.into() {
                GuardError::Internal(inner) => GuardError::Internal(format!("{msg}: {inner}")),
                GuardError::Configuration(inner) => {
                    GuardError::Configuration(format!("{msg}: {inner}"))
                }
                GuardError::Connection(inner) => GuardError::Connection(format!("{msg}: {inner}")),
                other => GuardError::Internal(format!("{msg}: {other}")),
            }
        })
    }
}
