//! Loading rule declarations and run settings from JSON.
//!
//! ```json
//! {
//!   "settings": { "stop_on_critical": true, "max_workers": 2 },
//!   "rules": [
//!     { "name": "emails_present", "type": "completeness", "severity": "critical",
//!       "table": "customers", "columns": ["email"] },
//!     { "type": "range", "severity": "medium", "table": "customers",
//!       "column": "age", "min": 0, "max": "${MAX_AGE}" }
//!   ]
//! }
//! ```
//!
//! `${VAR}` placeholders are replaced from the process environment before
//! parsing. Placeholders naming unset variables are left as written.

use crate::core::{RuleSet, RuleSpec, RunSettings};
use crate::error::{GuardError, Result};
use crate::validators::ValidatorRegistry;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Hard-coded regex should compile")
});

/// Rules and settings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub settings: RunSettings,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl RunConfig {
    /// Parses a JSON document after environment substitution.
    ///
    /// Malformed documents are configuration errors.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let expanded = substitute_env(json);
        let config: Self = serde_json::from_str(&expanded)
            .map_err(|e| GuardError::configuration(format!("invalid run configuration: {e}")))?;
        debug!(rules = config.rules.len(), "Loaded run configuration");
        Ok(config)
    }

    /// Reads and parses a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json).map_err(|e| match e {
            GuardError::Configuration(message) => {
                GuardError::Configuration(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Checks the settings and builds the rule set against `registry`.
    pub fn rule_set(&self, registry: &ValidatorRegistry) -> Result<RuleSet> {
        self.settings.validate()?;
        RuleSet::new(self.rules.clone(), registry)
    }
}

/// Replaces `${VAR}` with the JSON-escaped value of `VAR`.
pub fn substitute_env(text: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| match std::env::var(&caps[1]) {
            Ok(value) => escape_json(&value),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}

fn escape_json(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
