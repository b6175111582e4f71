//! In-memory mirror store
//!
//! Thread-safe implementation used by tests and development setups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{CreationEntry, MirrorStats, MirrorStore};
use crate::error::{EscrowError, EscrowResult};
use crate::types::{Digest32, EscrowId, MilestoneIndex, MilestoneRecord, TransferRecord};

/// In-memory mirror store
///
/// Milestone rows live in a BTreeMap keyed by `(escrow_id, index)`, which
/// gives index-ordered listings for free.
#[derive(Debug, Default)]
pub struct MemoryStore {
    milestones: RwLock<BTreeMap<(EscrowId, MilestoneIndex), MilestoneRecord>>,
    creation_keys: RwLock<HashMap<Digest32, CreationEntry>>,
    transfers: RwLock<Vec<TransferRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all data
    pub async fn clear(&self) {
        self.milestones.write().await.clear();
        self.creation_keys.write().await.clear();
        self.transfers.write().await.clear();
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    async fn insert_milestones(&self, rows: &[MilestoneRecord]) -> EscrowResult<()> {
        let mut milestones = self.milestones.write().await;
        for row in rows {
            if milestones.contains_key(&row.key()) {
                return Err(EscrowError::MirrorInconsistency(format!(
                    "milestone row ({}, {}) already exists",
                    row.escrow_id, row.index
                )));
            }
        }
        for row in rows {
            milestones.insert(row.key(), row.clone());
        }
        Ok(())
    }

    async fn get_milestone(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
    ) -> EscrowResult<Option<MilestoneRecord>> {
        let milestones = self.milestones.read().await;
        Ok(milestones.get(&(escrow_id, index)).cloned())
    }

    async fn list_milestones(&self, escrow_id: EscrowId) -> EscrowResult<Vec<MilestoneRecord>> {
        let milestones = self.milestones.read().await;
        Ok(milestones
            .range((escrow_id, 0)..=(escrow_id, MilestoneIndex::MAX))
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn mark_completed(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
        proof_data: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> EscrowResult<bool> {
        let mut milestones = self.milestones.write().await;
        let row = milestones.get_mut(&(escrow_id, index)).ok_or_else(|| {
            EscrowError::MirrorInconsistency(format!(
                "no mirror row for milestone ({}, {})",
                escrow_id, index
            ))
        })?;
        Ok(row.complete(proof_data, completed_at))
    }

    async fn put_creation_key(
        &self,
        key_digest: &Digest32,
        entry: &CreationEntry,
    ) -> EscrowResult<()> {
        let mut keys = self.creation_keys.write().await;
        keys.insert(*key_digest, entry.clone());
        Ok(())
    }

    async fn get_creation_entry(
        &self,
        key_digest: &Digest32,
    ) -> EscrowResult<Option<CreationEntry>> {
        let keys = self.creation_keys.read().await;
        Ok(keys.get(key_digest).cloned())
    }

    async fn record_transfer(&self, record: &TransferRecord) -> EscrowResult<()> {
        let mut transfers = self.transfers.write().await;
        transfers.push(record.clone());
        Ok(())
    }

    async fn list_transfers(
        &self,
        network: &str,
        address: &str,
    ) -> EscrowResult<Vec<TransferRecord>> {
        let transfers = self.transfers.read().await;
        Ok(transfers
            .iter()
            .filter(|t| t.network == network && t.involves(address))
            .cloned()
            .collect())
    }

    async fn stats(&self) -> EscrowResult<MirrorStats> {
        let milestones = self.milestones.read().await;
        let transfers = self.transfers.read().await;

        let mut escrows = std::collections::HashSet::new();
        let mut completed = 0u64;
        for ((escrow_id, _), row) in milestones.iter() {
            escrows.insert(*escrow_id);
            if row.is_completed() {
                completed += 1;
            }
        }
        let total = milestones.len() as u64;

        Ok(MirrorStats {
            escrows: escrows.len() as u64,
            total_milestones: total,
            pending_milestones: total - completed,
            completed_milestones: completed,
            transfers: transfers.len() as u64,
        })
    }
}
