//! Escrow Ledger Adapter
//!
//! Network-scoped facade over the external escrow ledger. The adapter holds
//! no state beyond network configuration; the ledger contract itself enforces
//! proof-hash matching, strict release ordering and the active flag, and the
//! adapter surfaces whatever revert reason it returns.
//!
//! `create_escrow` and `release_milestone` are the only state-mutating calls
//! and both are at-most-once from the adapter's perspective: a timeout while
//! awaiting confirmation does not mean the transaction did not land. Callers
//! re-query `get_escrow_details` before retrying, never resubmit blindly.

pub mod fake;
pub mod rpc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EscrowError, EscrowResult};
use crate::types::{Digest32, EscrowId, MilestoneIndex};

pub use fake::FakeLedger;
pub use rpc::{EscrowRpcClient, JsonRpcTransport};

/// Ledger-resident escrow state, amounts in base units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowDetails {
    pub funder: String,
    pub beneficiary: String,
    #[serde(with = "crate::types::u128_string")]
    pub total_amount: u128,
    #[serde(with = "crate::types::u128_string")]
    pub released_amount: u128,
    pub completed_milestones: u32,
    pub total_milestones: u32,
    pub is_active: bool,
}

/// Result of a confirmed escrow creation transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedEscrow {
    pub escrow_id: EscrowId,
    pub tx_hash: String,
}

/// Escrow ledger operations
///
/// Implementations: [`EscrowRpcClient`] against a real gateway,
/// [`FakeLedger`] for tests, [`DisabledLedger`] for unconfigured networks.
#[async_trait]
pub trait EscrowLedger: Send + Sync {
    /// Verify connectivity and chain identity
    async fn ping(&self) -> EscrowResult<()>;

    /// Submit the funds-locking creation transaction
    async fn create_escrow(
        &self,
        beneficiary: &str,
        total_amount: u128,
        milestone_hashes: &[Digest32],
    ) -> EscrowResult<CreatedEscrow>;

    /// Submit a milestone release transaction
    async fn release_milestone(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
        proof_hash: &Digest32,
    ) -> EscrowResult<String>;

    /// Read-only escrow state query
    async fn get_escrow_details(&self, escrow_id: EscrowId) -> EscrowResult<EscrowDetails>;

    /// Read-only commitment hash query, used by the mirror rebuild path
    async fn get_milestone_hash(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
    ) -> EscrowResult<Digest32>;
}

/// Explicit unconfigured ledger.
///
/// Every method fails immediately with a configuration error instead of
/// deferring the failure to a null dereference deep inside a transport call.
pub struct DisabledLedger {
    network: String,
}

impl DisabledLedger {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
        }
    }

    fn unconfigured(&self) -> EscrowError {
        EscrowError::Configuration(format!(
            "escrow ledger for network '{}' is not configured",
            self.network
        ))
    }
}

#[async_trait]
impl EscrowLedger for DisabledLedger {
    async fn ping(&self) -> EscrowResult<()> {
        Err(self.unconfigured())
    }

    async fn create_escrow(
        &self,
        _beneficiary: &str,
        _total_amount: u128,
        _milestone_hashes: &[Digest32],
    ) -> EscrowResult<CreatedEscrow> {
        Err(self.unconfigured())
    }

    async fn release_milestone(
        &self,
        _escrow_id: EscrowId,
        _index: MilestoneIndex,
        _proof_hash: &Digest32,
    ) -> EscrowResult<String> {
        Err(self.unconfigured())
    }

    async fn get_escrow_details(&self, _escrow_id: EscrowId) -> EscrowResult<EscrowDetails> {
        Err(self.unconfigured())
    }

    async fn get_milestone_hash(
        &self,
        _escrow_id: EscrowId,
        _index: MilestoneIndex,
    ) -> EscrowResult<Digest32> {
        Err(self.unconfigured())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_ledger_fails_fast() {
        let ledger = DisabledLedger::new("goerli");
        let err = ledger.ping().await.unwrap_err();
        assert!(matches!(err, EscrowError::Configuration(_)));
        assert!(err.to_string().contains("goerli"));

        let err = ledger.get_escrow_details(1).await.unwrap_err();
        assert!(matches!(err, EscrowError::Configuration(_)));
    }
}
