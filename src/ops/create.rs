//! Escrow creation
//!
//! Validates a creation request, derives milestone commitment hashes, submits
//! the funds-locking transaction and inserts one pending mirror row per
//! milestone. Mirror rows are written only after the ledger confirmed the
//! creation, so the mirror never claims funds that were never locked.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::commitment::{self, MilestoneDef, NATIVE_DECIMALS};
use crate::error::{EscrowError, EscrowResult};
use crate::ops::idempotency::{creation_key_digest, payload_digest, IdempotencyChecker};
use crate::ops::EscrowOps;
use crate::storage::{CreationEntry, MirrorStore};
use crate::types::{Digest32, EscrowId, MilestoneRecord};

/// Escrow creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEscrowRequest {
    /// Address receiving released funds
    pub beneficiary: String,
    /// Total locked amount in human units
    pub total_amount: Decimal,
    /// Milestone definitions, in release order
    pub milestones: Vec<MilestoneDef>,
    /// Optional caller-supplied idempotency key
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Creation outcome
#[derive(Debug, Clone)]
pub struct EscrowCreated {
    pub escrow_id: EscrowId,
    pub tx_hash: String,
    /// Commitment hashes in milestone order
    pub milestone_hashes: Vec<Digest32>,
    /// True when an idempotency key matched a previous creation and no new
    /// transaction was submitted
    pub reused: bool,
}

pub(super) async fn execute<S: MirrorStore + 'static>(
    ops: &EscrowOps<S>,
    request: CreateEscrowRequest,
) -> EscrowResult<EscrowCreated> {
    // Missing operator key is a configuration fault; surface it before any
    // hashing or network traffic.
    ops.network().require_operator_key()?;

    let (total_base, amounts, hashes) = validate_request(&request)?;
    let payload = payload_digest(&request.beneficiary, total_base, &hashes);

    let key_digest = request
        .idempotency_key
        .as_deref()
        .map(|key| creation_key_digest(&ops.network().id, key));
    let checker = IdempotencyChecker::new(ops.store().clone());

    if let Some(ref digest) = key_digest {
        if let Some(existing) = checker.check(digest).await? {
            // A key hit only answers for the same content; otherwise the
            // caller would receive hashes that do not exist on that escrow.
            if existing.payload_digest != payload {
                return Err(EscrowError::Validation(format!(
                    "idempotency key replayed with a different payload (escrow {} was \
                     created with other milestones)",
                    existing.escrow_id
                )));
            }
            info!(
                escrow_id = existing.escrow_id,
                network = %ops.network().id,
                "reusing escrow for repeated idempotency key"
            );
            return Ok(EscrowCreated {
                escrow_id: existing.escrow_id,
                tx_hash: existing.tx_hash,
                milestone_hashes: hashes,
                reused: true,
            });
        }
    }

    let created = ops
        .ledger()
        .create_escrow(&request.beneficiary, total_base, &hashes)
        .await?;

    info!(
        escrow_id = created.escrow_id,
        tx_hash = %created.tx_hash,
        network = %ops.network().id,
        milestones = request.milestones.len(),
        "escrow created on ledger"
    );

    let now = Utc::now();
    let rows: Vec<MilestoneRecord> = request
        .milestones
        .iter()
        .enumerate()
        .map(|(i, def)| {
            let mut row = MilestoneRecord::new(
                created.escrow_id,
                i as u32,
                def.title.clone(),
                def.description.clone(),
                amounts[i],
                def.completion_date,
                hashes[i],
                ops.network().id.clone(),
            );
            row.created_at = now;
            row
        })
        .collect();

    if let Err(e) = ops.store().insert_milestones(&rows).await {
        // Funds are locked but the mirror has no rows. The escrow id and
        // transaction hash in this error are what rebuild_mirror needs.
        error!(
            escrow_id = created.escrow_id,
            tx_hash = %created.tx_hash,
            error = %e,
            "escrow created on ledger but mirror insert failed"
        );
        return Err(EscrowError::MirrorInconsistency(format!(
            "escrow {} created (tx {}) but mirror rows could not be written: {}; \
             run rebuild_mirror with the original milestone definitions",
            created.escrow_id, created.tx_hash, e
        )));
    }

    if let Some(ref digest) = key_digest {
        let entry = CreationEntry {
            escrow_id: created.escrow_id,
            tx_hash: created.tx_hash.clone(),
            payload_digest: payload,
        };
        checker.record(digest, &entry).await;
    }

    Ok(EscrowCreated {
        escrow_id: created.escrow_id,
        tx_hash: created.tx_hash,
        milestone_hashes: hashes,
        reused: false,
    })
}

/// Validate the request and derive base amounts and commitment hashes.
///
/// The sum of milestone base amounts must equal the total exactly; a mismatch
/// of even one base unit would strand funds in the escrow.
fn validate_request(
    request: &CreateEscrowRequest,
) -> EscrowResult<(u128, Vec<u128>, Vec<Digest32>)> {
    if request.beneficiary.trim().is_empty() {
        return Err(EscrowError::Validation(
            "beneficiary must not be empty".to_string(),
        ));
    }
    if request.milestones.is_empty() {
        return Err(EscrowError::Validation(
            "at least one milestone is required".to_string(),
        ));
    }
    if request.total_amount <= Decimal::ZERO {
        return Err(EscrowError::Validation(format!(
            "total amount must be positive, got {}",
            request.total_amount
        )));
    }

    let total_base = commitment::amount_to_base_units(request.total_amount, NATIVE_DECIMALS)?;

    let mut amounts = Vec::with_capacity(request.milestones.len());
    let mut hashes = Vec::with_capacity(request.milestones.len());
    let mut sum: u128 = 0;
    for def in &request.milestones {
        def.validate(NATIVE_DECIMALS)?;
        let base = def.amount_base(NATIVE_DECIMALS)?;
        sum = sum.checked_add(base).ok_or_else(|| {
            EscrowError::Validation("milestone amounts overflow".to_string())
        })?;
        amounts.push(base);
        hashes.push(commitment::commitment_hash_parts(
            &def.title,
            &def.description,
            base,
            def.completion_date,
        ));
    }

    if sum != total_base {
        return Err(EscrowError::Validation(format!(
            "milestone amounts sum to {} base units but the total is {}",
            sum, total_base
        )));
    }

    Ok((total_base, amounts, hashes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(total: u32, amounts: &[u32]) -> CreateEscrowRequest {
        CreateEscrowRequest {
            beneficiary: "0xbeef".to_string(),
            total_amount: Decimal::from(total),
            milestones: amounts
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    MilestoneDef::new(
                        format!("Milestone {}", i),
                        "desc",
                        Decimal::from(*a),
                        1_735_689_600 + i as u64,
                    )
                })
                .collect(),
            idempotency_key: None,
        }
    }

    #[test]
    fn test_validate_accepts_exact_sum() {
        let (total, amounts, hashes) = validate_request(&request(1000, &[400, 600])).unwrap();
        assert_eq!(total, 1_000_000_000_000_000_000_000);
        assert_eq!(amounts.len(), 2);
        assert_eq!(hashes.len(), 2);
        assert_ne!(hashes[0], hashes[1]);
    }

    #[test]
    fn test_validate_rejects_sum_mismatch() {
        let err = validate_request(&request(1000, &[400, 500])).unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));
        assert!(err.to_string().contains("sum"));
    }

    #[test]
    fn test_validate_rejects_empty_milestones() {
        let err = validate_request(&request(1000, &[])).unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_empty_beneficiary() {
        let mut req = request(100, &[100]);
        req.beneficiary = "  ".to_string();
        assert!(validate_request(&req).is_err());
    }
}
