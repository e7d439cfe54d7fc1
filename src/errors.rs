//! Core error taxonomy for the Amulet backend.
//!
//! These are protocol-level kinds, not transport statuses. The HTTP layers
//! (`server::client_api`, `server::admin`) map them onto response envelopes.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type AmuletResult<T> = Result<T, AmuletError>;

#[derive(Debug, Error)]
pub enum AmuletError {
    /// No license or api key row matches the presented credential.
    #[error("not found")]
    NotFound,

    /// The license (or key) exists but is disabled.
    #[error("license is not active")]
    Inactive,

    /// The presented MAC does not match the bound device fingerprint.
    #[error("device does not match the bound fingerprint")]
    DeviceMismatch,

    /// A debit would drive the balance negative. Carries the current
    /// authoritative balance so the caller can reconcile without a re-read.
    #[error("insufficient credit (current balance: {credit})")]
    InsufficientCredit { credit: i64 },

    /// No active, free api key is available for checkout.
    #[error("api key pool exhausted")]
    PoolExhausted,

    /// Missing or malformed input (empty key, non-positive count, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The storage engine failed; the in-flight unit of work was rolled back.
    #[error("storage error: {0}")]
    StorageError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_credit_reports_balance() {
        let err = AmuletError::InsufficientCredit { credit: 7 };
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn invalid_input_carries_message() {
        let err = AmuletError::InvalidInput("count must be positive".to_string());
        assert!(err.to_string().contains("count must be positive"));
    }
}
