//! Milestone readiness check
//!
//! Side-effect-free precondition evaluation for a release: the mirror row
//! must exist and be pending, the escrow must be active on the ledger, and
//! the ledger's completion counter must sit exactly at the requested index.
//! Frontends poll this to decide whether to show a release button; the
//! release path re-runs it because the answer can change between poll and
//! submit.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::EscrowResult;
use crate::ops::EscrowOps;
use crate::storage::MirrorStore;
use crate::types::{EscrowId, MilestoneIndex};

/// Why a milestone cannot be released right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessBlocker {
    /// No mirror row for this milestone
    MirrorRowMissing,
    /// The mirror row is already completed
    AlreadyCompleted,
    /// The ledger reports the escrow inactive
    EscrowInactive,
    /// Milestones release strictly in order and this one is not next
    OutOfOrder { expected: MilestoneIndex },
    /// The ledger has released past this index but the mirror row is still
    /// pending; the mirror needs reconciliation before releases resume
    MirrorBehindLedger { ledger_completed: u32 },
}

impl fmt::Display for ReadinessBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MirrorRowMissing => write!(f, "no milestone record found"),
            Self::AlreadyCompleted => write!(f, "milestone is already completed"),
            Self::EscrowInactive => write!(f, "escrow is not active"),
            Self::OutOfOrder { expected } => write!(
                f,
                "milestones release in order; next releasable index is {}",
                expected
            ),
            Self::MirrorBehindLedger { ledger_completed } => write!(
                f,
                "ledger shows {} milestones completed but this record is still pending; \
                 sync from ledger before releasing",
                ledger_completed
            ),
        }
    }
}

/// Readiness answer for one milestone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub escrow_id: EscrowId,
    pub index: MilestoneIndex,
    pub is_ready: bool,
    pub blocker: Option<ReadinessBlocker>,
}

impl ReadinessReport {
    fn ready(escrow_id: EscrowId, index: MilestoneIndex) -> Self {
        Self {
            escrow_id,
            index,
            is_ready: true,
            blocker: None,
        }
    }

    fn blocked(escrow_id: EscrowId, index: MilestoneIndex, blocker: ReadinessBlocker) -> Self {
        Self {
            escrow_id,
            index,
            is_ready: false,
            blocker: Some(blocker),
        }
    }

    /// Human-readable blocker description
    pub fn reason(&self) -> Option<String> {
        self.blocker.as_ref().map(ToString::to_string)
    }
}

pub(super) async fn execute<S: MirrorStore + 'static>(
    ops: &EscrowOps<S>,
    escrow_id: EscrowId,
    index: MilestoneIndex,
) -> EscrowResult<ReadinessReport> {
    let row = match ops.store().get_milestone(escrow_id, index).await? {
        Some(row) => row,
        None => {
            return Ok(ReadinessReport::blocked(
                escrow_id,
                index,
                ReadinessBlocker::MirrorRowMissing,
            ))
        }
    };
    if row.is_completed() {
        return Ok(ReadinessReport::blocked(
            escrow_id,
            index,
            ReadinessBlocker::AlreadyCompleted,
        ));
    }

    // Ledger unavailability propagates as an error rather than a "not ready"
    // answer; the caller cannot tell blocked from unknown otherwise.
    let details = ops.fetch_details(escrow_id).await?;

    if !details.is_active {
        return Ok(ReadinessReport::blocked(
            escrow_id,
            index,
            ReadinessBlocker::EscrowInactive,
        ));
    }

    if details.completed_milestones > index {
        // The ledger released this milestone but the mirror missed the
        // update. Flag it loudly; releasing again would revert anyway.
        warn!(
            escrow_id,
            index,
            ledger_completed = details.completed_milestones,
            "mirror row pending behind ledger completion counter"
        );
        return Ok(ReadinessReport::blocked(
            escrow_id,
            index,
            ReadinessBlocker::MirrorBehindLedger {
                ledger_completed: details.completed_milestones,
            },
        ));
    }

    if details.completed_milestones < index {
        return Ok(ReadinessReport::blocked(
            escrow_id,
            index,
            ReadinessBlocker::OutOfOrder {
                expected: details.completed_milestones,
            },
        ));
    }

    Ok(ReadinessReport::ready(escrow_id, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocker_serialization_is_tagged() {
        let blocker = ReadinessBlocker::OutOfOrder { expected: 2 };
        let json = serde_json::to_value(&blocker).unwrap();
        assert_eq!(json["kind"], "out_of_order");
        assert_eq!(json["expected"], 2);
    }

    #[test]
    fn test_report_reason() {
        let report = ReadinessReport::blocked(1, 3, ReadinessBlocker::EscrowInactive);
        assert!(!report.is_ready);
        assert_eq!(report.reason().unwrap(), "escrow is not active");

        let report = ReadinessReport::ready(1, 3);
        assert!(report.is_ready);
        assert!(report.reason().is_none());
    }
}
