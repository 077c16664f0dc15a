//! SQL hardening for generated and user-supplied queries.
//!
//! Validators build SQL from rule parameters. Identifiers are validated and
//! double-quoted, literals are single-quoted with embedded quotes doubled,
//! and free-form SQL (custom queries, cross-field expressions) must be a
//! single read-only statement.

use crate::error::{GuardError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Keywords that may not appear in user-supplied SQL.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "drop", "delete", "insert", "update", "create", "alter", "truncate", "grant", "revoke",
    "merge", "exec", "execute", "call",
];

static IDENTIFIER_REGEX: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("Hard-coded regex pattern should be valid")
});

static FORBIDDEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    let alternatives = FORBIDDEN_KEYWORDS.join("|");
    #[allow(clippy::expect_used)]
    Regex::new(&format!(r"(?i)\b({alternatives})\b"))
        .expect("Hard-coded regex pattern should be valid")
});

/// SQL identifier and statement validation.
pub struct SqlSecurity;

impl SqlSecurity {
    /// Validates and double-quotes an identifier.
    ///
    /// Qualified names are quoted part by part.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dq_guard::security::SqlSecurity;
    ///
    /// assert_eq!(SqlSecurity::escape_identifier("customer_id").unwrap(), "\"customer_id\"");
    /// assert_eq!(SqlSecurity::escape_identifier("sales.orders").unwrap(), "\"sales\".\"orders\"");
    /// assert!(SqlSecurity::escape_identifier("id; DROP TABLE users--").is_err());
    /// ```
    pub fn escape_identifier(identifier: &str) -> Result<String> {
        Self::validate_identifier(identifier)?;
        let quoted: Vec<String> = identifier
            .split('.')
            .map(|part| format!("\"{part}\""))
            .collect();
        Ok(quoted.join("."))
    }

    /// Validates an identifier without quoting it.
    pub fn validate_identifier(identifier: &str) -> Result<()> {
        if identifier.trim().is_empty() {
            return Err(GuardError::Security(
                "SQL identifier cannot be empty or whitespace-only".to_string(),
            ));
        }
        if identifier.len() > 128 {
            return Err(GuardError::Security(
                "SQL identifier too long (max 128 characters)".to_string(),
            ));
        }
        if identifier.contains('\0') {
            return Err(GuardError::Security(
                "SQL identifier cannot contain null bytes".to_string(),
            ));
        }
        if !identifier.split('.').all(|part| IDENTIFIER_REGEX.is_match(part)) {
            return Err(GuardError::Security(format!(
                "Invalid SQL identifier format: '{identifier}'. Identifiers must start with a letter or underscore and contain only letters, numbers and underscores"
            )));
        }
        Ok(())
    }

    /// Single-quotes a string literal.
    pub fn escape_literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Compiles a regex pattern and returns it escaped for a SQL literal body.
    pub fn validate_regex_pattern(pattern: &str) -> Result<String> {
        if pattern.len() > 1000 {
            return Err(GuardError::Security(
                "Regex pattern too long (max 1000 characters)".to_string(),
            ));
        }
        if pattern.contains('\0') {
            return Err(GuardError::Security(
                "Regex pattern cannot contain null bytes".to_string(),
            ));
        }
        Regex::new(pattern)
            .map_err(|e| GuardError::Security(format!("Invalid regex pattern: {e}")))?;
        Ok(pattern.replace('\'', "''"))
    }

    /// Validates a boolean expression that will be embedded in a WHERE clause.
    pub fn validate_sql_expression(expression: &str) -> Result<()> {
        if expression.trim().is_empty() {
            return Err(GuardError::Security(
                "SQL expression cannot be empty".to_string(),
            ));
        }
        if expression.len() > 5000 {
            return Err(GuardError::Security(
                "SQL expression too long (max 5000 characters)".to_string(),
            ));
        }
        if expression.contains('\0') {
            return Err(GuardError::Security(
                "SQL expression cannot contain null bytes".to_string(),
            ));
        }

        let code = mask_literals_and_comments(expression);
        if code.contains(';') {
            return Err(GuardError::Security(
                "SQL expression cannot contain ';'".to_string(),
            ));
        }
        if expression.contains("--") || expression.contains("/*") {
            return Err(GuardError::Security(
                "SQL expression cannot contain comments".to_string(),
            ));
        }
        Self::check_forbidden_keywords(&code)
    }

    /// Validates a user-supplied query and returns it without trailing `;`.
    ///
    /// The query must be a single statement with no data-modifying keyword
    /// outside of string literals and comments.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dq_guard::security::SqlSecurity;
    ///
    /// let q = SqlSecurity::validate_read_only_query("SELECT * FROM t WHERE note = 'delete me';").unwrap();
    /// assert_eq!(q, "SELECT * FROM t WHERE note = 'delete me'");
    /// assert!(SqlSecurity::validate_read_only_query("DELETE FROM t").is_err());
    /// assert!(SqlSecurity::validate_read_only_query("SELECT 1; SELECT 2").is_err());
    /// ```
    pub fn validate_read_only_query(query: &str) -> Result<String> {
        if query.contains('\0') {
            return Err(GuardError::Security(
                "SQL query cannot contain null bytes".to_string(),
            ));
        }

        let mut trimmed = query.trim();
        while let Some(rest) = trimmed.strip_suffix(';') {
            trimmed = rest.trim_end();
        }
        if trimmed.is_empty() {
            return Err(GuardError::Security("SQL query cannot be empty".to_string()));
        }

        let code = mask_literals_and_comments(trimmed);
        if code.contains(';') {
            return Err(GuardError::Security(
                "multiple SQL statements are not allowed".to_string(),
            ));
        }
        Self::check_forbidden_keywords(&code)?;
        Ok(trimmed.to_string())
    }

    fn check_forbidden_keywords(code: &str) -> Result<()> {
        if let Some(found) = FORBIDDEN_REGEX.find(code) {
            return Err(GuardError::Security(format!(
                "SQL contains forbidden keyword: '{}'",
                found.as_str().to_uppercase()
            )));
        }
        Ok(())
    }
}

/// Replaces string literals, quoted identifiers and comments with spaces so
/// keyword scans only see SQL code.
fn mask_literals_and_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\'' | '"' => {
                out.push(' ');
                i += 1;
                while i < chars.len() {
                    if chars[i] == c {
                        if chars.get(i + 1) == Some(&c) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                out.push(' ');
                i += 1;
            }
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                out.push(' ');
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
