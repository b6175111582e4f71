//! Stablecoin transaction log row
//!
//! Write-once records created only after a token transaction is confirmed.
//! A submitted-but-unconfirmed transfer never appears in history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of token write operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Transfer,
    Approve,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer => write!(f, "transfer"),
            Self::Approve => write!(f, "approve"),
        }
    }
}

/// Transaction status
///
/// Rows are written post-confirmation only, so the single modeled state is
/// completed; there is no lifecycle beyond creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Completed,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "completed")
    }
}

/// One confirmed token transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Transaction hash returned by the ledger
    pub tx_hash: String,
    /// Sender address
    pub from_address: String,
    /// Recipient (or spender, for approvals)
    pub to_address: String,
    /// Amount in the token's base units
    #[serde(with = "super::u128_string")]
    pub amount_base: u128,
    /// Token symbol
    pub token: String,
    /// Network identifier
    pub network: String,
    /// Operation kind
    pub kind: TransferKind,
    /// Always completed; see type docs
    pub status: TransferStatus,
    /// Confirmation time
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn confirmed(
        tx_hash: String,
        from_address: String,
        to_address: String,
        amount_base: u128,
        token: String,
        network: String,
        kind: TransferKind,
    ) -> Self {
        Self {
            tx_hash,
            from_address,
            to_address,
            amount_base,
            token,
            network,
            kind,
            status: TransferStatus::Completed,
            timestamp: Utc::now(),
        }
    }

    /// Whether the record involves the given address on either side
    pub fn involves(&self, address: &str) -> bool {
        self.from_address == address || self.to_address == address
    }
}
