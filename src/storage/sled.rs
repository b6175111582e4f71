//! Sled-backed mirror store
//!
//! Persistent implementation over the sled embedded database. One tree per
//! concern; milestone keys are big-endian `(escrow_id, index)` composites so
//! prefix scans yield index order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

use super::{CreationEntry, MirrorStats, MirrorStore, StorageConfig};
use crate::error::{EscrowError, EscrowResult};
use crate::types::{Digest32, EscrowId, MilestoneIndex, MilestoneRecord, TransferRecord};

const MILESTONES_TREE: &str = "milestones";
const CREATION_KEYS_TREE: &str = "creation_keys";
const TRANSFERS_TREE: &str = "transfers";

/// Sled persistent mirror store
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    milestones: sled::Tree,
    creation_keys: sled::Tree,
    transfers: sled::Tree,
}

impl SledStore {
    /// Open using a storage configuration
    pub fn new(config: &StorageConfig) -> EscrowResult<Self> {
        Self::open(&config.data_dir)
    }

    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> EscrowResult<Self> {
        let db = sled::open(path)
            .map_err(|e| EscrowError::Storage(format!("Failed to open sled db: {}", e)))?;
        let milestones = db
            .open_tree(MILESTONES_TREE)
            .map_err(|e| EscrowError::Storage(format!("Failed to open milestones tree: {}", e)))?;
        let creation_keys = db.open_tree(CREATION_KEYS_TREE).map_err(|e| {
            EscrowError::Storage(format!("Failed to open creation_keys tree: {}", e))
        })?;
        let transfers = db
            .open_tree(TRANSFERS_TREE)
            .map_err(|e| EscrowError::Storage(format!("Failed to open transfers tree: {}", e)))?;

        Ok(Self {
            db,
            milestones,
            creation_keys,
            transfers,
        })
    }

    /// Flush to disk
    pub fn flush(&self) -> EscrowResult<()> {
        self.db
            .flush()
            .map_err(|e| EscrowError::Storage(format!("Failed to flush db: {}", e)))?;
        Ok(())
    }

    fn serialize<T: Serialize>(value: &T) -> EscrowResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| EscrowError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> EscrowResult<T> {
        serde_json::from_slice(bytes).map_err(|e| EscrowError::Serialization(e.to_string()))
    }

    fn milestone_key(escrow_id: EscrowId, index: MilestoneIndex) -> [u8; 12] {
        let mut key = [0u8; 12];
        key[..8].copy_from_slice(&escrow_id.to_be_bytes());
        key[8..].copy_from_slice(&index.to_be_bytes());
        key
    }

    fn storage_err(context: &str, e: sled::Error) -> EscrowError {
        EscrowError::Storage(format!("{}: {}", context, e))
    }
}

#[async_trait]
impl MirrorStore for SledStore {
    async fn insert_milestones(&self, rows: &[MilestoneRecord]) -> EscrowResult<()> {
        for row in rows {
            let key = Self::milestone_key(row.escrow_id, row.index);
            let exists = self
                .milestones
                .contains_key(key)
                .map_err(|e| Self::storage_err("Failed to check milestone", e))?;
            if exists {
                return Err(EscrowError::MirrorInconsistency(format!(
                    "milestone row ({}, {}) already exists",
                    row.escrow_id, row.index
                )));
            }
        }
        for row in rows {
            let key = Self::milestone_key(row.escrow_id, row.index);
            let value = Self::serialize(row)?;
            self.milestones
                .insert(key, value)
                .map_err(|e| Self::storage_err("Failed to insert milestone", e))?;
        }
        Ok(())
    }

    async fn get_milestone(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
    ) -> EscrowResult<Option<MilestoneRecord>> {
        let key = Self::milestone_key(escrow_id, index);
        match self
            .milestones
            .get(key)
            .map_err(|e| Self::storage_err("Failed to get milestone", e))?
        {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_milestones(&self, escrow_id: EscrowId) -> EscrowResult<Vec<MilestoneRecord>> {
        let mut rows = Vec::new();
        for item in self.milestones.scan_prefix(escrow_id.to_be_bytes()) {
            let (_, bytes) = item.map_err(|e| Self::storage_err("Failed to scan milestones", e))?;
            rows.push(Self::deserialize(&bytes)?);
        }
        Ok(rows)
    }

    async fn mark_completed(
        &self,
        escrow_id: EscrowId,
        index: MilestoneIndex,
        proof_data: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> EscrowResult<bool> {
        let key = Self::milestone_key(escrow_id, index);
        let bytes = self
            .milestones
            .get(key)
            .map_err(|e| Self::storage_err("Failed to get milestone", e))?
            .ok_or_else(|| {
                EscrowError::MirrorInconsistency(format!(
                    "no mirror row for milestone ({}, {})",
                    escrow_id, index
                ))
            })?;

        let mut row: MilestoneRecord = Self::deserialize(&bytes)?;
        let transitioned = row.complete(proof_data, completed_at);
        if transitioned {
            let value = Self::serialize(&row)?;
            self.milestones
                .insert(key, value)
                .map_err(|e| Self::storage_err("Failed to update milestone", e))?;
        }
        Ok(transitioned)
    }

    async fn put_creation_key(
        &self,
        key_digest: &Digest32,
        entry: &CreationEntry,
    ) -> EscrowResult<()> {
        let value = Self::serialize(entry)?;
        self.creation_keys
            .insert(key_digest, value)
            .map_err(|e| Self::storage_err("Failed to save creation key", e))?;
        Ok(())
    }

    async fn get_creation_entry(
        &self,
        key_digest: &Digest32,
    ) -> EscrowResult<Option<CreationEntry>> {
        match self
            .creation_keys
            .get(key_digest)
            .map_err(|e| Self::storage_err("Failed to get creation key", e))?
        {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn record_transfer(&self, record: &TransferRecord) -> EscrowResult<()> {
        let seq = self
            .db
            .generate_id()
            .map_err(|e| Self::storage_err("Failed to allocate transfer id", e))?;
        let value = Self::serialize(record)?;
        self.transfers
            .insert(seq.to_be_bytes(), value)
            .map_err(|e| Self::storage_err("Failed to record transfer", e))?;
        Ok(())
    }

    async fn list_transfers(
        &self,
        network: &str,
        address: &str,
    ) -> EscrowResult<Vec<TransferRecord>> {
        let mut rows = Vec::new();
        for item in self.transfers.iter() {
            let (_, bytes) = item.map_err(|e| Self::storage_err("Failed to scan transfers", e))?;
            let record: TransferRecord = Self::deserialize(&bytes)?;
            if record.network == network && record.involves(address) {
                rows.push(record);
            }
        }
        Ok(rows)
    }

    async fn stats(&self) -> EscrowResult<MirrorStats> {
        let mut escrows = std::collections::HashSet::new();
        let mut total = 0u64;
        let mut completed = 0u64;
        for item in self.milestones.iter() {
            let (_, bytes) = item.map_err(|e| Self::storage_err("Failed to scan milestones", e))?;
            let row: MilestoneRecord = Self::deserialize(&bytes)?;
            escrows.insert(row.escrow_id);
            total += 1;
            if row.is_completed() {
                completed += 1;
            }
        }

        Ok(MirrorStats {
            escrows: escrows.len() as u64,
            total_milestones: total,
            pending_milestones: total - completed,
            completed_milestones: completed,
            transfers: self.transfers.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MilestoneStatus, TransferKind};

    fn open_temp() -> (SledStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn row(escrow_id: EscrowId, index: MilestoneIndex) -> MilestoneRecord {
        MilestoneRecord::new(
            escrow_id,
            index,
            format!("Milestone {}", index),
            "desc".to_string(),
            100,
            1_735_689_600,
            [index as u8 + 1; 32],
            "localhost".to_string(),
        )
    }

    #[tokio::test]
    async fn test_insert_list_ordered_by_index() {
        let (store, _dir) = open_temp();
        store
            .insert_milestones(&[row(5, 2), row(5, 0), row(5, 1), row(9, 0)])
            .await
            .unwrap();

        let listed = store.list_milestones(5).await.unwrap();
        let indexes: Vec<_> = listed.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_mark_completed_persists() {
        let (store, _dir) = open_temp();
        store.insert_milestones(&[row(3, 0)]).await.unwrap();

        assert!(store
            .mark_completed(3, 0, Some("proof".to_string()), Utc::now())
            .await
            .unwrap());
        assert!(!store.mark_completed(3, 0, None, Utc::now()).await.unwrap());

        let stored = store.get_milestone(3, 0).await.unwrap().unwrap();
        assert_eq!(stored.status, MilestoneStatus::Completed);
        assert_eq!(stored.proof_data.as_deref(), Some("proof"));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let (store, _dir) = open_temp();
        store.insert_milestones(&[row(3, 0)]).await.unwrap();
        let err = store.insert_milestones(&[row(3, 0)]).await.unwrap_err();
        assert!(matches!(err, EscrowError::MirrorInconsistency(_)));
    }

    #[tokio::test]
    async fn test_transfer_log_and_stats() {
        let (store, _dir) = open_temp();
        store.insert_milestones(&[row(1, 0), row(1, 1)]).await.unwrap();
        store.mark_completed(1, 0, None, Utc::now()).await.unwrap();

        let record = TransferRecord::confirmed(
            "0xabc".to_string(),
            "0xfrom".to_string(),
            "0xto".to_string(),
            50_000_000,
            "USDC".to_string(),
            "localhost".to_string(),
            TransferKind::Transfer,
        );
        store.record_transfer(&record).await.unwrap();

        let found = store.list_transfers("localhost", "0xto").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(store
            .list_transfers("mainnet", "0xto")
            .await
            .unwrap()
            .is_empty());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.escrows, 1);
        assert_eq!(stats.total_milestones, 2);
        assert_eq!(stats.completed_milestones, 1);
        assert_eq!(stats.transfers, 1);
    }

    #[tokio::test]
    async fn test_reopen_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.insert_milestones(&[row(7, 0)]).await.unwrap();
            store.flush().unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        let stored = store.get_milestone(7, 0).await.unwrap();
        assert!(stored.is_some());
    }
}
