//! Input validation for the ViewSync catalog
//!
//! Provides validation functions to prevent:
//! - Statement injection through view row filters
//! - Path traversal attacks
//! - Malformed names and identifiers
//! - Excessively long inputs

use crate::{CatalogError, Result};

/// Maximum length for table and column names
pub const MAX_TECHNICAL_NAME_LEN: usize = 255;

/// Maximum length for datasource/rule identifiers
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Maximum length for a view row filter
pub const MAX_FILTER_RULE_LEN: usize = 2000;

/// Validate a table or column name reported by a source
///
/// Requirements:
/// - Not empty
/// - <= 255 characters
/// - No control characters
///
/// Quotes are allowed; identifiers are always quoted when rendered into SQL.
pub fn validate_technical_name(name: &str, kind: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CatalogError::ValidationError(format!(
            "{} name cannot be empty",
            kind
        )));
    }

    if name.chars().count() > MAX_TECHNICAL_NAME_LEN {
        return Err(CatalogError::ValidationError(format!(
            "{} name too long: {} > {} characters",
            kind,
            name.chars().count(),
            MAX_TECHNICAL_NAME_LEN
        )));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(CatalogError::ValidationError(format!(
            "{} name contains control characters",
            kind
        )));
    }

    Ok(())
}

/// Validate a datasource or rule identifier
///
/// Requirements:
/// - Not empty
/// - <= 100 characters
/// - Alphanumeric, underscore, hyphen only
pub fn validate_identifier(identifier: &str, field_name: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(CatalogError::ValidationError(format!(
            "{} cannot be empty",
            field_name
        )));
    }

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(CatalogError::ValidationError(format!(
            "{} too long: {} > {} characters",
            field_name,
            identifier.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    if !identifier
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CatalogError::ValidationError(format!(
            "{} contains invalid characters (allowed: alphanumeric, _, -)",
            field_name
        )));
    }

    Ok(())
}

/// Validate a user-defined row filter before it is appended with `WHERE`
///
/// The filter is a boolean expression; statement separators and comments
/// would let it escape the generated SELECT.
pub fn validate_filter_rule(filter: &str) -> Result<()> {
    if filter.trim().is_empty() {
        return Err(CatalogError::ValidationError(
            "Filter rule cannot be blank".to_string(),
        ));
    }

    if filter.len() > MAX_FILTER_RULE_LEN {
        return Err(CatalogError::ValidationError(format!(
            "Filter rule too long: {} > {} characters",
            filter.len(),
            MAX_FILTER_RULE_LEN
        )));
    }

    if filter.contains(';') || filter.contains("--") || filter.contains("/*") {
        return Err(CatalogError::ValidationError(
            "Filter rule contains a statement separator or comment".to_string(),
        ));
    }

    Ok(())
}

/// Validate file:// URI path for traversal attacks
pub fn validate_file_uri_path(path: &str) -> Result<()> {
    if path.contains("..") {
        return Err(CatalogError::ValidationError(
            "Path contains traversal pattern (..)".to_string(),
        ));
    }

    if path.contains('\0') {
        return Err(CatalogError::ValidationError(
            "Path contains null byte".to_string(),
        ));
    }

    Ok(())
}
