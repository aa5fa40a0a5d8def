//! Security utilities for SQL injection prevention in gridway-rdbc.
//!
//! Provides:
//! - Identifier validation for table and column names
//! - String literal escaping for SQL string contexts
//! - LIKE pattern escaping for user-supplied match values
//!
//! Every user value the broker touches is bound as a parameter; these
//! helpers cover the identifiers and pattern fragments that end up inside
//! the SQL text itself.

use crate::error::Error;

/// Escape character used by all generated LIKE predicates.
pub const LIKE_ESCAPE_CHAR: char = '~';

/// Validate a SQL identifier (table, column names).
///
/// Prevents SQL injection by enforcing strict character rules:
/// - Must not be empty
/// - Maximum 255 characters
/// - Must start with ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use gridway_rdbc::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("country").is_ok());
/// assert!(validate_sql_identifier("order_items_2").is_ok());
///
/// // Rejects injection attempts
/// assert!(validate_sql_identifier("x; DROP TABLE country--").is_err());
/// assert!(validate_sql_identifier("").is_err());
/// assert!(validate_sql_identifier("123abc").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > 255 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 255)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// Escape a string value for safe interpolation into a SQL string literal
/// context. Replaces `'` with `''`.
///
/// **Prefer parameterized queries whenever possible.** This is a fallback
/// for the few places where SQL generation requires a complete string.
pub fn escape_string_literal(value: &str) -> String {
    // Fast path: no escaping needed (common case)
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}

/// Escape LIKE metacharacters in a user value so it matches literally.
///
/// `_`, `%` and the escape character itself are prefixed with
/// [`LIKE_ESCAPE_CHAR`]; the caller appends `escape ?` and binds the escape
/// character alongside the pattern.
///
/// # Examples
///
/// ```
/// use gridway_rdbc::security::escape_like_pattern;
///
/// assert_eq!(escape_like_pattern("50%"), "50~%");
/// assert_eq!(escape_like_pattern("a_b"), "a~_b");
/// assert_eq!(escape_like_pattern("x~y"), "x~~y");
/// ```
pub fn escape_like_pattern(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '_' || c == '%' || c == LIKE_ESCAPE_CHAR {
            out.push(LIKE_ESCAPE_CHAR);
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_sql_identifier("country").is_ok());
        assert!(validate_sql_identifier("my_table").is_ok());
        assert!(validate_sql_identifier("_private").is_ok());
        assert!(validate_sql_identifier("a").is_ok());
        assert!(validate_sql_identifier("TABLE_123").is_ok());
    }

    #[test]
    fn test_empty_identifier() {
        assert!(validate_sql_identifier("").is_err());
    }

    #[test]
    fn test_too_long_identifier() {
        let long = "a".repeat(256);
        assert!(validate_sql_identifier(&long).is_err());

        let max = "a".repeat(255);
        assert!(validate_sql_identifier(&max).is_ok());
    }

    #[test]
    fn test_injection_attempts() {
        assert!(validate_sql_identifier("x; DROP TABLE country--").is_err());
        assert!(validate_sql_identifier("x' OR '1'='1").is_err());
        assert!(validate_sql_identifier("x--").is_err());
        assert!(validate_sql_identifier("tabl\u{0435}").is_err()); // Cyrillic е
        assert!(validate_sql_identifier("user name").is_err());
        assert!(validate_sql_identifier("x\0").is_err());
        assert!(validate_sql_identifier("schema.table").is_err());
    }

    #[test]
    fn test_escape_string_literal() {
        assert_eq!(escape_string_literal("country"), "country");
        assert_eq!(escape_string_literal("don't"), "don''t");
        assert_eq!(
            escape_string_literal("x'; DROP TABLE country--"),
            "x''; DROP TABLE country--"
        );
    }

    #[test]
    fn test_escape_like_pattern() {
        assert_eq!(escape_like_pattern("plain"), "plain");
        assert_eq!(escape_like_pattern("100%_done"), "100~%~_done");
        assert_eq!(escape_like_pattern("~"), "~~");
        assert_eq!(escape_like_pattern(""), "");
    }
}
