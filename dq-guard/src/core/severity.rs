//! Rule severity levels.

use crate::error::{GuardError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The severity of a rule's failure.
///
/// Severities are totally ordered: `Low < Medium < High < Critical`. They drive
/// the critical-stop decision and summary grouping only; they never change
/// the order in which rules are executed.
///
/// # Examples
///
/// ```rust
/// use dq_guard::core::Severity;
///
/// assert!(Severity::Critical > Severity::High);
/// assert_eq!("medium".parse::<Severity>().unwrap(), Severity::Medium);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic or informational findings
    Low = 0,
    /// Issues worth a look during regular review
    #[default]
    Medium = 1,
    /// Issues that degrade downstream results
    High = 2,
    /// Integrity violations; may stop the run when `stop_on_critical` is set
    Critical = 3,
}

impl Severity {
    /// All severities, lowest first.
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Returns the string representation of the severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Checks if this severity is at least as severe as another.
    pub fn is_at_least(&self, other: Severity) -> bool {
        *self >= other
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(GuardError::configuration(format!(
                "invalid severity '{other}', expected one of: critical, high, medium, low"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        let mut all = vec![Severity::High, Severity::Low, Severity::Critical, Severity::Medium];
        all.sort();
        assert_eq!(all, Severity::ALL.to_vec());
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(" low ".parse::<Severity>().unwrap(), Severity::Low);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_severity_is_at_least() {
        assert!(Severity::Critical.is_at_least(Severity::Low));
        assert!(Severity::High.is_at_least(Severity::High));
        assert!(!Severity::Medium.is_at_least(Severity::High));
    }

    #[test]
    fn test_severity_serde() {
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"high\"");

        let severity: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(severity, Severity::Critical);
    }
}
