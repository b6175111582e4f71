//! Escrow Service Error Types
//!
//! Error definitions for milestone escrow and stablecoin transfer operations.

use thiserror::Error;

/// Escrow service error
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Malformed input caught before any network call
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Missing RPC endpoint, contract address or operator key material
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// RPC/network failure reaching the ledger
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// The ledger rejected the transaction (revert)
    #[error("Ledger rejected transaction: {reason}")]
    LedgerSubmission { reason: String },

    /// Readiness check failed for a release request
    #[error("Milestone not ready: {reason}")]
    MilestoneNotReady { reason: String },

    /// Detected mismatch between ledger state and the off-chain mirror
    #[error("Mirror inconsistency: {0}")]
    MirrorInconsistency(String),

    /// Mirror store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input at an internal boundary
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Escrow result type
pub type EscrowResult<T> = Result<T, EscrowError>;

impl EscrowError {
    /// Whether the operation may be retried verbatim.
    ///
    /// Only pre-submission unavailability qualifies. A reverted transaction
    /// reverts again, and validation errors need corrected input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EscrowError::LedgerUnavailable(_))
    }
}

impl From<reqwest::Error> for EscrowError {
    fn from(e: reqwest::Error) -> Self {
        EscrowError::LedgerUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for EscrowError {
    fn from(e: serde_json::Error) -> Self {
        EscrowError::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for EscrowError {
    fn from(e: hex::FromHexError) -> Self {
        EscrowError::Serialization(format!("Hex decode error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EscrowError::LedgerUnavailable("timeout".to_string()).is_retryable());
        assert!(!EscrowError::LedgerSubmission {
            reason: "reverted".to_string()
        }
        .is_retryable());
        assert!(!EscrowError::Validation("empty beneficiary".to_string()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = EscrowError::MilestoneNotReady {
            reason: "expected index 0".to_string(),
        };
        assert!(err.to_string().contains("expected index 0"));
    }
}
