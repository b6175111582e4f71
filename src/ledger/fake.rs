//! In-memory fake ledger
//!
//! Enforces the same rules the deployed escrow contract enforces (proof hash
//! match, strict index ordering, active flag), so orchestrator tests exercise
//! real revert paths without a node. Also used by local development setups.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::error::{EscrowError, EscrowResult};
use crate::types::{Digest32, EscrowId, MilestoneIndex};

use super::{CreatedEscrow, EscrowDetails, EscrowLedger};

#[derive(Debug, Clone)]
struct FakeEscrow {
    funder: String,
    beneficiary: String,
    total_amount: u128,
    hashes: Vec<Digest32>,
    released_amount: u128,
    completed: u32,
    is_active: bool,
}

/// Fake escrow ledger
pub struct FakeLedger {
    escrows: RwLock<HashMap<EscrowId, FakeEscrow>>,
    next_id: AtomicU64,
    tx_counter: AtomicU64,
    unavailable: AtomicBool,
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            escrows: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tx_counter: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate the node being unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Deactivate an escrow out-of-band (dispute/refund path on a real chain)
    pub async fn deactivate(&self, escrow_id: EscrowId) {
        if let Some(escrow) = self.escrows.write().await.get_mut(&escrow_id) {
            escrow.is_active = false;
        }
    }

    /// Advance the completion counter without going through the adapter.
    ///
    /// Simulates a release whose mirror update was lost, for divergence
    /// tests.
    pub async fn force_complete(&self, escrow_id: EscrowId, completed: u32) {
        if let Some(escrow) = self.escrows.write().await.get_mut(&escrow_id) {
            escrow.completed = completed;
        }
    }

    fn check_available(&self) -> EscrowResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EscrowError::LedgerUnavailable(
                "fake ledger marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn next_tx_hash(&self) -> String {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        format!("0x{:064x}", 0xfa_4e_00_00_u128 + n as u128)
    }

    fn revert(reason: &str) -> EscrowError {
        EscrowError::LedgerSubmission {
            reason: format!("execution reverted: {}", reason),
        }
    }
}

#[async_trait]
impl EscrowLedger for FakeLedger {
    async fn ping(&self) -> EscrowResult<()> {
        self.check_available()
    }

    async fn create_escrow(
        &self,
        beneficiary: &str,
        total_amount: u128,
        milestone_hashes: &[Digest32],
    ) -> EscrowResult<CreatedEscrow> {
        self.check_available()?;
        if beneficiary.trim().is_empty() {
            return Err(Self::revert("invalid beneficiary"));
        }
        if total_amount == 0 {
            return Err(Self::revert("total amount must be positive"));
        }
        if milestone_hashes.is_empty() {
            return Err(Self::revert("no milestones"));
        }

        let escrow_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let escrow = FakeEscrow {
            funder: "0x00000000000000000000000000000000000000f1".to_string(),
            beneficiary: beneficiary.to_string(),
            total_amount,
            hashes: milestone_hashes.to_vec(),
            released_amount: 0,
            completed: 0,
            is_active: true,
        };
        self.escrows.write().await.insert(escrow_id, escrow);

        Ok(CreatedEscrow {
            escrow_id,
            tx_hash: self.next_tx_hash(),
        })
    }

    async fn release_milestone(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
        proof_hash: &Digest32,
    ) -> EscrowResult<String> {
        self.check_available()?;
        let mut escrows = self.escrows.write().await;
        let escrow = escrows
            .get_mut(&escrow_id)
            .ok_or_else(|| Self::revert("unknown escrow"))?;

        if !escrow.is_active {
            return Err(Self::revert("escrow is not active"));
        }
        let total = escrow.hashes.len() as u32;
        if index >= total {
            return Err(Self::revert("milestone index out of range"));
        }
        if index != escrow.completed {
            return Err(Self::revert("milestones must be released in order"));
        }
        if &escrow.hashes[index as usize] != proof_hash {
            return Err(Self::revert("proof hash mismatch"));
        }

        // Equal split with the remainder going to the final milestone; the
        // fake tracks hashes only, per-milestone amounts live off-chain.
        let share = escrow.total_amount / u128::from(total);
        escrow.completed += 1;
        if escrow.completed == total {
            escrow.released_amount = escrow.total_amount;
            escrow.is_active = false;
        } else {
            escrow.released_amount += share;
        }

        Ok(self.next_tx_hash())
    }

    async fn get_escrow_details(&self, escrow_id: EscrowId) -> EscrowResult<EscrowDetails> {
        self.check_available()?;
        let escrows = self.escrows.read().await;
        let escrow = escrows
            .get(&escrow_id)
            .ok_or_else(|| Self::revert("unknown escrow"))?;

        Ok(EscrowDetails {
            funder: escrow.funder.clone(),
            beneficiary: escrow.beneficiary.clone(),
            total_amount: escrow.total_amount,
            released_amount: escrow.released_amount,
            completed_milestones: escrow.completed,
            total_milestones: escrow.hashes.len() as u32,
            is_active: escrow.is_active,
        })
    }

    async fn get_milestone_hash(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
    ) -> EscrowResult<Digest32> {
        self.check_available()?;
        let escrows = self.escrows.read().await;
        let escrow = escrows
            .get(&escrow_id)
            .ok_or_else(|| Self::revert("unknown escrow"))?;
        escrow
            .hashes
            .get(index as usize)
            .copied()
            .ok_or_else(|| Self::revert("milestone index out of range"))
    }
}
