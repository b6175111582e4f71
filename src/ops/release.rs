//! Milestone release
//!
//! Re-checks readiness, recomputes the proof hash from the stored milestone
//! row, submits the release transaction and flips the mirror row. The ledger
//! is the gate: a submission that reverts leaves the mirror untouched, and a
//! mirror update that fails after a confirmed submission is logged for the
//! reconcile path rather than failing the release.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::commitment::commitment_hash_parts;
use crate::error::{EscrowError, EscrowResult};
use crate::ops::EscrowOps;
use crate::storage::MirrorStore;
use crate::types::{EscrowId, MilestoneIndex};

/// Release outcome
#[derive(Debug, Clone)]
pub struct MilestoneReleased {
    pub escrow_id: EscrowId,
    pub index: MilestoneIndex,
    pub tx_hash: String,
}

pub(super) async fn execute<S: MirrorStore + 'static>(
    ops: &EscrowOps<S>,
    escrow_id: EscrowId,
    index: MilestoneIndex,
    proof_data: Option<String>,
) -> EscrowResult<MilestoneReleased> {
    ops.network().require_operator_key()?;

    let report = super::readiness::execute(ops, escrow_id, index).await?;
    if !report.is_ready {
        return Err(EscrowError::MilestoneNotReady {
            reason: report
                .reason()
                .unwrap_or_else(|| "milestone is not releasable".to_string()),
        });
    }

    // Readiness just confirmed the row exists; a miss here means the store
    // lost it in between.
    let row = ops
        .store()
        .get_milestone(escrow_id, index)
        .await?
        .ok_or_else(|| {
            EscrowError::MirrorInconsistency(format!(
                "milestone row ({}, {}) disappeared during release",
                escrow_id, index
            ))
        })?;

    // The proof hash is the commitment recomputed from the stored metadata.
    // It must match the hash recorded at creation; a mismatch means the row
    // was edited after hashing and the submission would revert on-chain.
    let proof_hash = commitment_hash_parts(
        &row.title,
        &row.description,
        row.amount_base,
        row.completion_date,
    );
    if proof_hash != row.hash {
        return Err(EscrowError::MirrorInconsistency(format!(
            "stored metadata for milestone ({}, {}) no longer matches its commitment hash",
            escrow_id, index
        )));
    }

    let tx_hash = ops
        .ledger()
        .release_milestone(escrow_id, index, &proof_hash)
        .await?;

    info!(
        escrow_id,
        index,
        tx_hash = %tx_hash,
        network = %ops.network().id,
        "milestone released on ledger"
    );

    match ops
        .store()
        .mark_completed(escrow_id, index, proof_data, Utc::now())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            // Lost a race with a concurrent completion of the same row.
            warn!(escrow_id, index, "mirror row was already completed");
        }
        Err(e) => {
            // The funds moved; only the cache is stale. sync_from_ledger
            // repairs this row on its next run.
            error!(
                escrow_id,
                index,
                tx_hash = %tx_hash,
                error = %e,
                "release confirmed but mirror update failed"
            );
        }
    }

    Ok(MilestoneReleased {
        escrow_id,
        index,
        tx_hash,
    })
}
