//! Escrow orchestrator
//!
//! Sequences the commitment hasher, the ledger adapter and the mirror store
//! into the creation and release workflows:
//!
//! ```text
//! Create:  validate → hash → submit → mirror insert
//! Release: readiness → proof hash → submit → mirror complete
//! ```
//!
//! Each invocation is a self-contained sequence of awaited calls; the
//! orchestrator holds no shared mutable state. Concurrent releases racing on
//! the same milestone are arbitrated by the ledger's ordering check: the
//! loser's submission reverts, which is an expected, recoverable outcome.

pub mod create;
pub mod idempotency;
pub mod readiness;
pub mod reconcile;
pub mod release;

use std::sync::Arc;

use crate::commitment::MilestoneDef;
use crate::config::{NetworkConfig, RetryPolicy};
use crate::error::EscrowResult;
use crate::ledger::{EscrowDetails, EscrowLedger};
use crate::retry::retry_read;
use crate::storage::MirrorStore;
use crate::types::{EscrowId, MilestoneIndex};

pub use create::{CreateEscrowRequest, EscrowCreated};
pub use idempotency::{creation_key_digest, payload_digest, IdempotencyChecker};
pub use readiness::{ReadinessBlocker, ReadinessReport};
pub use reconcile::{RebuildReport, SyncReport};
pub use release::MilestoneReleased;

/// Orchestrator for one network
pub struct EscrowOps<S: MirrorStore> {
    /// Ledger adapter
    ledger: Arc<dyn EscrowLedger>,
    /// Mirror store
    store: Arc<S>,
    /// Network entry backing the ledger adapter
    network: NetworkConfig,
    /// Retry policy for read-side ledger calls
    retry: RetryPolicy,
}

impl<S: MirrorStore + 'static> EscrowOps<S> {
    pub fn new(
        ledger: Arc<dyn EscrowLedger>,
        store: Arc<S>,
        network: NetworkConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            store,
            network,
            retry,
        }
    }

    /// Create an escrow: hash milestones, submit the funds-locking
    /// transaction, persist one pending mirror row per milestone.
    pub async fn create_milestone_escrow(
        &self,
        request: CreateEscrowRequest,
    ) -> EscrowResult<EscrowCreated> {
        create::execute(self, request).await
    }

    /// Side-effect-free readiness check, safe for UI polling
    pub async fn check_milestone_readiness(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
    ) -> EscrowResult<ReadinessReport> {
        readiness::execute(self, escrow_id, index).await
    }

    /// Gated release: re-verify readiness, submit, flip the mirror row
    pub async fn release_milestone(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
        proof_data: Option<String>,
    ) -> EscrowResult<MilestoneReleased> {
        release::execute(self, escrow_id, index, proof_data).await
    }

    /// Repair path: complete mirror rows the ledger already shows released
    pub async fn sync_from_ledger(&self, escrow_id: EscrowId) -> EscrowResult<SyncReport> {
        reconcile::sync(self, escrow_id).await
    }

    /// Repair path: re-derive mirror rows from on-chain hashes plus
    /// externally supplied metadata after a failed creation-time insert
    pub async fn rebuild_mirror(
        &self,
        escrow_id: EscrowId,
        defs: &[MilestoneDef],
    ) -> EscrowResult<RebuildReport> {
        reconcile::rebuild(self, escrow_id, defs).await
    }

    /// Ledger state query with read-side retry
    pub(crate) async fn fetch_details(&self, escrow_id: EscrowId) -> EscrowResult<EscrowDetails> {
        let ledger = self.ledger.clone();
        retry_read(&self.retry, "get_escrow_details", move || {
            let ledger = ledger.clone();
            async move { ledger.get_escrow_details(escrow_id).await }
        })
        .await
    }

    pub fn ledger(&self) -> &Arc<dyn EscrowLedger> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }
}
