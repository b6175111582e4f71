//! Milestone mirror row
//!
//! The off-chain shadow of a single milestone's status. Keyed by
//! `(escrow_id, index)`; the ledger remains authoritative over completion
//! state, the mirror is a read-optimized cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Digest32, EscrowId, MilestoneIndex};

/// Milestone lifecycle status
///
/// `Pending → Completed`, terminal. A failed release attempt leaves the
/// milestone pending; there is no failed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    /// Awaiting release
    Pending,
    /// Funds released on the ledger
    Completed,
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Off-chain mirror row for one milestone
///
/// Definition fields (title, description, amount, completion date) are
/// immutable after creation: changing them would invalidate the commitment
/// hash stored on the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneRecord {
    /// Parent escrow, assigned by the ledger at creation
    pub escrow_id: EscrowId,
    /// Zero-based position within the escrow's milestone list
    pub index: MilestoneIndex,
    /// Human-readable title
    pub title: String,
    /// Human-readable description
    pub description: String,
    /// Releasable portion of escrow funds, in base units
    #[serde(with = "super::u128_string")]
    pub amount_base: u128,
    /// Target completion date, unix seconds
    pub completion_date: u64,
    /// Commitment hash computed at creation; must equal the on-chain hash
    pub hash: Digest32,
    /// Lifecycle status
    pub status: MilestoneStatus,
    /// Network this escrow lives on
    pub network: String,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Populated on transition to completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Evidence supplied with the release request, if any
    pub proof_data: Option<String>,
}

impl MilestoneRecord {
    /// Create a new pending row
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        escrow_id: EscrowId,
        index: MilestoneIndex,
        title: String,
        description: String,
        amount_base: u128,
        completion_date: u64,
        hash: Digest32,
        network: String,
    ) -> Self {
        Self {
            escrow_id,
            index,
            title,
            description,
            amount_base,
            completion_date,
            hash,
            status: MilestoneStatus::Pending,
            network,
            created_at: Utc::now(),
            completed_at: None,
            proof_data: None,
        }
    }

    /// Natural key
    pub fn key(&self) -> (EscrowId, MilestoneIndex) {
        (self.escrow_id, self.index)
    }

    pub fn is_completed(&self) -> bool {
        self.status == MilestoneStatus::Completed
    }

    /// Transition to completed.
    ///
    /// Returns `false` without touching the row when already completed, so
    /// a second bookkeeping attempt after a race is a no-op.
    pub fn complete(&mut self, proof_data: Option<String>, at: DateTime<Utc>) -> bool {
        if self.is_completed() {
            return false;
        }
        self.status = MilestoneStatus::Completed;
        self.completed_at = Some(at);
        self.proof_data = proof_data;
        true
    }
}
