//! Mirror reconciliation
//!
//! Two repair paths for a mirror that fell behind the ledger:
//!
//! - `sync` completes mirror rows the ledger's completion counter already
//!   covers, healing releases whose mirror update was lost.
//! - `rebuild` re-derives the full row set from externally supplied milestone
//!   definitions after a failed creation-time insert, verifying every
//!   recomputed hash against the on-chain commitment first.
//!
//! A mirror that is AHEAD of the ledger is never auto-repaired: it claims a
//! release the ledger denies, which points at a bug or tampering and needs an
//! operator.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::commitment::{self, MilestoneDef, NATIVE_DECIMALS};
use crate::error::{EscrowError, EscrowResult};
use crate::ops::EscrowOps;
use crate::storage::MirrorStore;
use crate::types::{EscrowId, MilestoneIndex, MilestoneRecord};

const SYNC_PROOF_NOTE: &str = "synchronized from ledger state";

/// Outcome of a ledger-to-mirror sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub escrow_id: EscrowId,
    /// Ledger completion counter at sync time
    pub ledger_completed: u32,
    /// Indexes flipped from pending to completed by this sync
    pub repaired: Vec<MilestoneIndex>,
}

/// Outcome of a mirror rebuild
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildReport {
    pub escrow_id: EscrowId,
    /// Rows written
    pub inserted: u32,
    /// Rows written already completed per the ledger counter
    pub completed: u32,
}

pub(super) async fn sync<S: MirrorStore + 'static>(
    ops: &EscrowOps<S>,
    escrow_id: EscrowId,
) -> EscrowResult<SyncReport> {
    let details = ops.fetch_details(escrow_id).await?;
    let rows = ops.store().list_milestones(escrow_id).await?;

    let mut repaired = Vec::new();
    for row in &rows {
        let ledger_released = row.index < details.completed_milestones;
        if ledger_released && !row.is_completed() {
            let transitioned = ops
                .store()
                .mark_completed(
                    escrow_id,
                    row.index,
                    Some(SYNC_PROOF_NOTE.to_string()),
                    Utc::now(),
                )
                .await?;
            if transitioned {
                repaired.push(row.index);
            }
        } else if !ledger_released && row.is_completed() {
            return Err(EscrowError::MirrorInconsistency(format!(
                "mirror marks milestone ({}, {}) completed but the ledger counter is {}",
                escrow_id, row.index, details.completed_milestones
            )));
        }
    }

    if repaired.is_empty() {
        info!(escrow_id, "mirror already consistent with ledger");
    } else {
        warn!(escrow_id, repaired = ?repaired, "mirror rows repaired from ledger");
    }

    Ok(SyncReport {
        escrow_id,
        ledger_completed: details.completed_milestones,
        repaired,
    })
}

pub(super) async fn rebuild<S: MirrorStore + 'static>(
    ops: &EscrowOps<S>,
    escrow_id: EscrowId,
    defs: &[MilestoneDef],
) -> EscrowResult<RebuildReport> {
    let details = ops.fetch_details(escrow_id).await?;

    if defs.len() as u32 != details.total_milestones {
        return Err(EscrowError::Validation(format!(
            "escrow {} has {} milestones on the ledger but {} definitions were supplied",
            escrow_id,
            details.total_milestones,
            defs.len()
        )));
    }

    // Rebuild never overwrites; partial row sets need operator cleanup first.
    let existing = ops.store().list_milestones(escrow_id).await?;
    if !existing.is_empty() {
        return Err(EscrowError::InvalidInput(format!(
            "escrow {} already has {} mirror rows; use sync_from_ledger instead",
            escrow_id,
            existing.len()
        )));
    }

    let mut amounts = Vec::with_capacity(defs.len());
    let mut sum: u128 = 0;
    for def in defs {
        def.validate(NATIVE_DECIMALS)?;
        let base = def.amount_base(NATIVE_DECIMALS)?;
        sum = sum.checked_add(base).ok_or_else(|| {
            EscrowError::Validation("milestone amounts overflow".to_string())
        })?;
        amounts.push(base);
    }
    if sum != details.total_amount {
        return Err(EscrowError::Validation(format!(
            "supplied definitions sum to {} base units but the ledger locked {}",
            sum, details.total_amount
        )));
    }

    // Every recomputed hash must match the on-chain commitment; otherwise the
    // supplied metadata is not what was escrowed.
    let now = Utc::now();
    let mut rows = Vec::with_capacity(defs.len());
    for (i, def) in defs.iter().enumerate() {
        let index = i as u32;
        let hash = commitment::commitment_hash_parts(
            &def.title,
            &def.description,
            amounts[i],
            def.completion_date,
        );
        let on_chain = ops.ledger().get_milestone_hash(escrow_id, index).await?;
        if hash != on_chain {
            return Err(EscrowError::Validation(format!(
                "definition for milestone {} does not match the on-chain commitment",
                index
            )));
        }

        let mut row = MilestoneRecord::new(
            escrow_id,
            index,
            def.title.clone(),
            def.description.clone(),
            amounts[i],
            def.completion_date,
            hash,
            ops.network().id.clone(),
        );
        if index < details.completed_milestones {
            row.complete(Some(SYNC_PROOF_NOTE.to_string()), now);
        }
        rows.push(row);
    }

    ops.store().insert_milestones(&rows).await?;

    info!(
        escrow_id,
        inserted = rows.len(),
        completed = details.completed_milestones,
        "mirror rows rebuilt from ledger commitments"
    );

    Ok(RebuildReport {
        escrow_id,
        inserted: rows.len() as u32,
        completed: details.completed_milestones,
    })
}
