//! Logging configuration for dq-guard.
//!
//! The engine emits structured `tracing` events: run start and finish at
//! `info`, per-rule outcomes at `debug`/`warn`/`error`. [`LogConfig`]
//! controls how much rule detail goes into those events; [`setup`] installs
//! a subscriber for applications that do not bring their own.

use tracing::Level;

/// How much detail the engine puts into its log events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Most verbose level the engine uses for per-rule events
    pub base_level: Level,
    /// Whether passing rules are logged individually
    pub log_rule_details: bool,
    /// Whether failing rules log the query that found the violations
    pub log_queries: bool,
    /// Maximum length for logged field values (to prevent huge logs)
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_rule_details: false,
            log_queries: true,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Everything, with long query text.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_rule_details: true,
            log_queries: true,
            max_field_length: 1024,
        }
    }

    /// Failures only, without query text.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_rule_details: false,
            log_queries: false,
            max_field_length: 128,
        }
    }

    pub fn balanced() -> Self {
        Self::default()
    }

    /// Returns true if per-rule events at `level` are emitted.
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.base_level
    }

    /// The query to attach to a log event, if queries are logged.
    pub fn query_field(&self, query: Option<&str>) -> Option<String> {
        if !self.log_queries {
            return None;
        }
        query.map(|q| truncate_field(q, self.max_field_length))
    }
}

/// Truncates a string to at most `max_length` bytes on a char boundary.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Subscriber setup for applications and tests.
pub mod setup {
    use crate::error::{GuardError, Result};
    use tracing::Level;

    /// Configuration for the global subscriber.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Level for everything outside dq-guard
        pub level: Level,
        /// Level for dq-guard itself
        pub crate_level: Level,
        /// Emit JSON lines instead of compact text
        pub json_format: bool,
        /// Filter directive overriding the two levels
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                crate_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// JSON output, warnings from dependencies, run summaries from dq-guard.
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                crate_level: Level::INFO,
                json_format: true,
                env_filter: None,
            }
        }

        pub fn development() -> Self {
            Self {
                level: Level::DEBUG,
                crate_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }

        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        pub fn with_crate_level(mut self, level: Level) -> Self {
            self.crate_level = level;
            self
        }

        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// The filter directive built from this configuration.
        pub fn env_filter(&self) -> String {
            match &self.env_filter {
                Some(filter) => filter.clone(),
                None => format!(
                    "{},dq_guard={}",
                    self.level.as_str().to_lowercase(),
                    self.crate_level.as_str().to_lowercase()
                ),
            }
        }
    }

    /// Installs a global `tracing` subscriber.
    ///
    /// `RUST_LOG` takes precedence over the configured levels. Fails with a
    /// configuration error if a global subscriber is already set.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use dq_guard::logging::setup::{init_logging, LoggingConfig};
    ///
    /// init_logging(LoggingConfig::production()).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(config.env_filter()))
            .map_err(|e| GuardError::configuration(format!("invalid log filter: {e}")))?;

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().compact().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| GuardError::configuration(format!("logging already initialized: {e}")))
    }
}
