//! Creation idempotency
//!
//! Callers may attach an idempotency key to an escrow creation request. The
//! key is digested together with the network id and looked up in the mirror
//! store before any ledger submission; a hit short-circuits to the previously
//! created escrow instead of locking funds twice.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::EscrowResult;
use crate::storage::{CreationEntry, MirrorStore};
use crate::types::Digest32;

/// Domain prefix keeping creation-key digests disjoint from other sha-256 uses
const CREATION_KEY_DOMAIN: &[u8] = b"escrow-create";

/// Domain prefix for creation payload digests
const CREATION_PAYLOAD_DOMAIN: &[u8] = b"escrow-create-payload";

/// Digest of a caller-supplied idempotency key, scoped to a network
pub fn creation_key_digest(network: &str, key: &str) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(CREATION_KEY_DOMAIN);
    hasher.update([0u8]);
    hasher.update(network.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    let out = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&out);
    digest
}

/// Digest of a creation request's content.
///
/// Stored next to the key so a replay of the same key with a different
/// beneficiary, total or milestone set is detected. The milestone commitment
/// hashes already bind every definition field.
pub fn payload_digest(beneficiary: &str, total_base: u128, hashes: &[Digest32]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(CREATION_PAYLOAD_DOMAIN);
    hasher.update([0u8]);
    hasher.update(beneficiary.as_bytes());
    hasher.update([0u8]);
    hasher.update(total_base.to_be_bytes());
    for hash in hashes {
        hasher.update(hash);
    }
    let out = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&out);
    digest
}

/// Idempotency checker backed by the mirror store
pub struct IdempotencyChecker<S: MirrorStore> {
    store: Arc<S>,
}

impl<S: MirrorStore> IdempotencyChecker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Previously recorded creation under this key digest, if any
    pub async fn check(&self, key_digest: &Digest32) -> EscrowResult<Option<CreationEntry>> {
        let entry = self.store.get_creation_entry(key_digest).await?;
        if let Some(ref existing) = entry {
            debug!(
                escrow_id = existing.escrow_id,
                tx_hash = %existing.tx_hash,
                "idempotency key already used"
            );
        }
        Ok(entry)
    }

    /// Record a completed creation under its key digest.
    ///
    /// A write failure here is logged, not propagated: the escrow exists and
    /// the mirror rows are in place, so the creation itself succeeded. The
    /// worst case is that a replay of the same key creates a second escrow.
    pub async fn record(&self, key_digest: &Digest32, entry: &CreationEntry) {
        if let Err(e) = self.store.put_creation_key(key_digest, entry).await {
            warn!(
                escrow_id = entry.escrow_id,
                error = %e,
                "failed to persist creation idempotency key"
            );
        }
    }
}
