//! SQL hygiene helpers shared by every dialect.
//!
//! Metadata queries interpolate table names into `IN (...)` lists and the
//! trigger DDL interpolates names and native types into statements that
//! cannot be parameterized. Everything that reaches those strings goes
//! through here first.

use crate::error::{Error, Result};

/// Validate a name used to derive other object names (triggers, functions,
/// shadow tables).
///
/// Accepts ASCII letters, digits and underscores, starting with a letter or
/// underscore, up to 128 characters.
///
/// ```
/// use tributary_rdbc::security::validate_identifier;
///
/// assert!(validate_identifier("orders").is_ok());
/// assert!(validate_identifier("_etl_orders").is_ok());
/// assert!(validate_identifier("x; DROP TABLE orders").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("identifier cannot be empty"));
    }
    if name.len() > 128 {
        return Err(Error::validation(format!(
            "identifier too long: {} chars (max 128)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::validation(format!(
                "invalid identifier '{}': must start with a letter or underscore",
                name
            )))
        }
    }
    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::validation(format!(
            "invalid identifier '{}': contains '{}'",
            name, bad
        )));
    }
    Ok(())
}

/// Escape a value for a single-quoted SQL literal.
///
/// ```
/// use tributary_rdbc::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("o'brien"), "o''brien");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}

/// Render names as a comma-separated list of quoted literals for `IN (...)`.
pub fn literal_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", escape_string_literal(v.as_ref())))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate a native type name before it is copied into shadow-table DDL.
///
/// Letters, digits, underscores, spaces, parentheses, commas, periods and
/// single quotes (for `enum('a','b')`) are allowed.
pub fn validate_native_type(type_name: &str) -> Result<()> {
    if type_name.trim().is_empty() {
        return Err(Error::validation("native type cannot be empty"));
    }
    if type_name.contains("--") {
        return Err(Error::validation(format!(
            "invalid native type '{}': comment sequence",
            type_name
        )));
    }
    if let Some(bad) = type_name.chars().find(|c| {
        !(c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ',' | '.' | '\''))
    }) {
        return Err(Error::validation(format!(
            "invalid native type '{}': contains '{}'",
            type_name, bad
        )));
    }
    Ok(())
}
