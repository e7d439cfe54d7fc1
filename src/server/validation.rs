//! Request validation utilities for the Amulet API.
//!
//! Input normalization and checks shared by the client and admin endpoints.

use std::fmt;

/// Validation error type.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Normalize a MAC fingerprint before any comparison or storage.
///
/// Trims surrounding whitespace, strips interior whitespace, and
/// uppercases, so `" aa:bb:cc "` and `"AA:BB:CC"` bind identically.
///
/// # Example
/// ```
/// use amulet::server::validation::normalize_mac;
///
/// assert_eq!(normalize_mac("  aa:bb:cc:dd:ee:ff "), "AA:BB:CC:DD:EE:FF");
/// ```
pub fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Validate that a string field is non-empty after trimming.
pub fn validate_not_empty(value: &str, field_name: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        Err(ValidationError {
            field: field_name.to_string(),
            message: "must not be empty".to_string(),
        })
    } else {
        Ok(())
    }
}

/// Validate a count of generations: present, positive, finite.
pub fn validate_count(count: i64, field_name: &str) -> ValidationResult<()> {
    if count < 1 {
        Err(ValidationError {
            field: field_name.to_string(),
            message: "must be a positive integer".to_string(),
        })
    } else {
        Ok(())
    }
}
