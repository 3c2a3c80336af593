//! Identifier validation for table, column and constraint names.
//!
//! Operations are authored by operators and replayed long after they were
//! written, so names are validated when an operation is constructed rather
//! than when its DDL is eventually generated.

use crate::error::{MigrateError, Result};

/// Maximum identifier length (PostgreSQL truncates at 63 bytes).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes
/// - Identifiers exceeding the maximum length
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MigrateError::IllegalState(format!(
            "{} name cannot be empty",
            kind
        )));
    }

    if name.contains('\0') {
        return Err(MigrateError::IllegalState(format!(
            "{} name contains a null byte: {:?}",
            kind, name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::IllegalState(format!(
            "{} name exceeds maximum length of {} bytes (got {} bytes): {:?}",
            kind,
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Validate a non-empty list of identifiers.
pub fn validate_identifiers(kind: &str, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(MigrateError::IllegalState(format!(
            "at least one {} name is required",
            kind
        )));
    }
    for name in names {
        validate_identifier(kind, name)?;
    }
    Ok(())
}
