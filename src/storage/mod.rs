//! Mirror store
//!
//! Off-chain persistence for milestone rows, creation idempotency keys and
//! the stablecoin transaction log. The mirror is a read-optimized cache of
//! ledger state: eventually consistent with, never authoritative over, the
//! ledger. Rows are inserted only after the creation transaction confirmed.

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EscrowResult;
use crate::types::{Digest32, EscrowId, MilestoneIndex, MilestoneRecord, TransferRecord};

/// Escrow id and transaction hash recorded under a creation idempotency key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreationEntry {
    pub escrow_id: EscrowId,
    pub tx_hash: String,
    /// Digest of the creation payload; a replay of the key with different
    /// content is rejected instead of answered with the wrong escrow
    pub payload_digest: Digest32,
}

/// Mirror store operations
#[async_trait]
pub trait MirrorStore: Send + Sync {
    // ==================== Milestone rows ====================

    /// Insert one pending row per milestone. Fails if any row already exists.
    async fn insert_milestones(&self, rows: &[MilestoneRecord]) -> EscrowResult<()>;

    /// Fetch one row by natural key
    async fn get_milestone(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
    ) -> EscrowResult<Option<MilestoneRecord>>;

    /// All rows for an escrow, ordered by index
    async fn list_milestones(&self, escrow_id: EscrowId) -> EscrowResult<Vec<MilestoneRecord>>;

    /// Transition a row to completed.
    ///
    /// Returns `false` when the row was already completed (no-op); the ledger
    /// is the true gate and this update is best-effort bookkeeping. Fails if
    /// the row does not exist.
    async fn mark_completed(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
        proof_data: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> EscrowResult<bool>;

    // ==================== Creation idempotency keys ====================

    /// Record the escrow created under an idempotency key digest
    async fn put_creation_key(
        &self,
        key_digest: &Digest32,
        entry: &CreationEntry,
    ) -> EscrowResult<()>;

    /// Look up a previous creation by idempotency key digest
    async fn get_creation_entry(
        &self,
        key_digest: &Digest32,
    ) -> EscrowResult<Option<CreationEntry>>;

    // ==================== Stablecoin transaction log ====================

    /// Append a confirmed transfer row (write-once)
    async fn record_transfer(&self, record: &TransferRecord) -> EscrowResult<()>;

    /// Transfers on a network involving the given address, oldest first
    async fn list_transfers(
        &self,
        network: &str,
        address: &str,
    ) -> EscrowResult<Vec<TransferRecord>>;

    // ==================== Operator summary ====================

    async fn stats(&self) -> EscrowResult<MirrorStats>;
}

/// Mirror store summary counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorStats {
    /// Distinct escrows with mirror rows
    pub escrows: u64,
    /// Milestone rows in total
    pub total_milestones: u64,
    /// Rows still pending
    pub pending_milestones: u64,
    /// Rows completed
    pub completed_milestones: u64,
    /// Confirmed transfer rows
    pub transfers: u64,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Data directory for the persistent backend
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./escrow_data".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn development() -> Self {
        Self {
            data_dir: "./escrow_dev_data".to_string(),
        }
    }
}

pub use self::sled::SledStore;
pub use memory::MemoryStore;
