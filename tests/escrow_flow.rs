//! End-to-end escrow workflows against the in-memory ledger and mirror store.

use std::sync::Arc;

use rust_decimal::Decimal;

use milestone_escrow::{
    CreateEscrowRequest, EscrowConfig, EscrowError, EscrowLedger, EscrowService, FakeLedger,
    MemoryStore, MilestoneDef, MilestoneStatus, MirrorStore, ReadinessBlocker,
};

const NETWORK: &str = "localhost";

fn service_with_fake() -> (EscrowService<MemoryStore>, Arc<FakeLedger>, Arc<MemoryStore>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let ledger = Arc::new(FakeLedger::new());
    let store = Arc::new(MemoryStore::new());
    let service = EscrowService::with_ledger(
        EscrowConfig::development(),
        NETWORK,
        ledger.clone(),
        store.clone(),
    )
    .unwrap();
    (service, ledger, store)
}

fn two_milestone_request() -> CreateEscrowRequest {
    CreateEscrowRequest {
        beneficiary: "0x000000000000000000000000000000000000beef".to_string(),
        total_amount: Decimal::from(1000u32),
        milestones: vec![
            MilestoneDef::new(
                "Foundation poured",
                "Concrete foundation complete and inspected",
                Decimal::from(400u32),
                1_735_689_600,
            ),
            MilestoneDef::new(
                "Structure complete",
                "Framing and roof finished",
                Decimal::from(600u32),
                1_743_465_600,
            ),
        ],
        idempotency_key: None,
    }
}

#[tokio::test]
async fn happy_path_create_then_release_in_order() {
    let (service, _ledger, _store) = service_with_fake();

    let created = service
        .create_milestone_escrow(NETWORK, two_milestone_request())
        .await
        .unwrap();
    assert!(!created.reused);
    assert_eq!(created.milestone_hashes.len(), 2);

    let rows = service.milestones(created.escrow_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == MilestoneStatus::Pending));
    assert_eq!(rows[0].amount_base, 400_000_000_000_000_000_000);

    // The second milestone is not releasable before the first.
    let report = service
        .check_milestone_readiness(NETWORK, created.escrow_id, 1)
        .await
        .unwrap();
    assert!(!report.is_ready);
    assert_eq!(
        report.blocker,
        Some(ReadinessBlocker::OutOfOrder { expected: 0 })
    );

    let released = service
        .release_milestone(
            NETWORK,
            created.escrow_id,
            0,
            Some("inspection-report-42".to_string()),
        )
        .await
        .unwrap();
    assert!(!released.tx_hash.is_empty());

    let report = service
        .check_milestone_readiness(NETWORK, created.escrow_id, 1)
        .await
        .unwrap();
    assert!(report.is_ready);

    service
        .release_milestone(NETWORK, created.escrow_id, 1, None)
        .await
        .unwrap();

    let details = service
        .escrow_details(NETWORK, created.escrow_id)
        .await
        .unwrap();
    assert!(!details.is_active);
    assert_eq!(details.completed_milestones, 2);
    assert_eq!(details.released_amount, details.total_amount);

    let rows = service.milestones(created.escrow_id).await.unwrap();
    assert!(rows.iter().all(|r| r.status == MilestoneStatus::Completed));
    assert_eq!(rows[0].proof_data.as_deref(), Some("inspection-report-42"));
}

#[tokio::test]
async fn release_out_of_order_is_rejected_and_leaves_mirror_pending() {
    let (service, _ledger, _store) = service_with_fake();
    let created = service
        .create_milestone_escrow(NETWORK, two_milestone_request())
        .await
        .unwrap();

    let err = service
        .release_milestone(NETWORK, created.escrow_id, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::MilestoneNotReady { .. }));

    let rows = service.milestones(created.escrow_id).await.unwrap();
    assert!(rows.iter().all(|r| r.status == MilestoneStatus::Pending));
}

#[tokio::test]
async fn create_rejects_milestone_sum_mismatch() {
    let (service, ledger, store) = service_with_fake();

    let mut request = two_milestone_request();
    request.milestones[1].amount = Decimal::from(500u32);

    let err = service
        .create_milestone_escrow(NETWORK, request)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Validation(_)));

    // Nothing was submitted or mirrored.
    assert!(matches!(
        ledger.get_escrow_details(1).await.unwrap_err(),
        EscrowError::LedgerSubmission { .. }
    ));
    assert_eq!(store.stats().await.unwrap().total_milestones, 0);
}

#[tokio::test]
async fn idempotency_key_reuses_existing_escrow() {
    let (service, _ledger, store) = service_with_fake();

    let mut request = two_milestone_request();
    request.idempotency_key = Some("property-77-round-1".to_string());

    let first = service
        .create_milestone_escrow(NETWORK, request.clone())
        .await
        .unwrap();
    let second = service
        .create_milestone_escrow(NETWORK, request)
        .await
        .unwrap();

    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(second.escrow_id, first.escrow_id);
    assert_eq!(second.tx_hash, first.tx_hash);
    assert_eq!(second.milestone_hashes, first.milestone_hashes);
    assert_eq!(store.stats().await.unwrap().escrows, 1);
}

#[tokio::test]
async fn idempotency_key_replay_with_different_payload_is_rejected() {
    let (service, _ledger, store) = service_with_fake();

    let mut request = two_milestone_request();
    request.idempotency_key = Some("property-77-round-1".to_string());
    service
        .create_milestone_escrow(NETWORK, request.clone())
        .await
        .unwrap();

    // Same key, different milestone split.
    request.milestones[0].amount = Decimal::from(300u32);
    request.milestones[1].amount = Decimal::from(700u32);

    let err = service
        .create_milestone_escrow(NETWORK, request)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Validation(_)));

    // No second escrow was created.
    assert_eq!(store.stats().await.unwrap().escrows, 1);
}

#[tokio::test]
async fn mirror_behind_ledger_blocks_release_until_synced() {
    let (service, ledger, _store) = service_with_fake();
    let created = service
        .create_milestone_escrow(NETWORK, two_milestone_request())
        .await
        .unwrap();

    // A release happened whose mirror update was lost.
    ledger.force_complete(created.escrow_id, 1).await;

    let report = service
        .check_milestone_readiness(NETWORK, created.escrow_id, 0)
        .await
        .unwrap();
    assert_eq!(
        report.blocker,
        Some(ReadinessBlocker::MirrorBehindLedger {
            ledger_completed: 1
        })
    );

    let err = service
        .release_milestone(NETWORK, created.escrow_id, 0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::MilestoneNotReady { .. }));

    let synced = service
        .sync_from_ledger(NETWORK, created.escrow_id)
        .await
        .unwrap();
    assert_eq!(synced.repaired, vec![0]);
    assert_eq!(synced.ledger_completed, 1);

    // After the repair the next milestone releases normally.
    let report = service
        .check_milestone_readiness(NETWORK, created.escrow_id, 1)
        .await
        .unwrap();
    assert!(report.is_ready);
    service
        .release_milestone(NETWORK, created.escrow_id, 1, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn inactive_escrow_blocks_release() {
    let (service, ledger, _store) = service_with_fake();
    let created = service
        .create_milestone_escrow(NETWORK, two_milestone_request())
        .await
        .unwrap();

    ledger.deactivate(created.escrow_id).await;

    let report = service
        .check_milestone_readiness(NETWORK, created.escrow_id, 0)
        .await
        .unwrap();
    assert_eq!(report.blocker, Some(ReadinessBlocker::EscrowInactive));
}

#[tokio::test]
async fn health_check_surfaces_unavailable_ledger() {
    let (service, ledger, _store) = service_with_fake();
    service.health_check().await.unwrap();

    ledger.set_unavailable(true);
    let err = service.health_check().await.unwrap_err();
    assert!(matches!(err, EscrowError::LedgerUnavailable(_)));
}

#[tokio::test]
async fn ledger_unavailability_is_an_error_not_a_blocker() {
    let (service, ledger, _store) = service_with_fake();
    let created = service
        .create_milestone_escrow(NETWORK, two_milestone_request())
        .await
        .unwrap();

    ledger.set_unavailable(true);
    let err = service
        .check_milestone_readiness(NETWORK, created.escrow_id, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::LedgerUnavailable(_)));
}

#[tokio::test]
async fn tampered_mirror_row_never_reaches_the_ledger() {
    use milestone_escrow::{commitment, MilestoneRecord, MirrorStore};

    let (service, ledger, store) = service_with_fake();

    // Escrow created out-of-band with the correct commitment hash.
    let def = MilestoneDef::new(
        "Foundation poured",
        "Concrete foundation complete and inspected",
        Decimal::from(400u32),
        1_735_689_600,
    );
    let amount_base = def.amount_base(milestone_escrow::NATIVE_DECIMALS).unwrap();
    let hash = commitment::commitment_hash(&def, milestone_escrow::NATIVE_DECIMALS).unwrap();
    let created = ledger
        .create_escrow("0xbeef", amount_base, &[hash])
        .await
        .unwrap();

    // Mirror row whose amount was edited after hashing.
    let row = MilestoneRecord::new(
        created.escrow_id,
        0,
        def.title.clone(),
        def.description.clone(),
        amount_base + 1,
        def.completion_date,
        hash,
        NETWORK.to_string(),
    );
    store.insert_milestones(&[row]).await.unwrap();

    let err = service
        .release_milestone(NETWORK, created.escrow_id, 0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::MirrorInconsistency(_)));

    // No submission happened and the row stays pending.
    let details = ledger.get_escrow_details(created.escrow_id).await.unwrap();
    assert_eq!(details.completed_milestones, 0);
    let rows = service.milestones(created.escrow_id).await.unwrap();
    assert_eq!(rows[0].status, MilestoneStatus::Pending);
}

#[tokio::test]
async fn rebuild_mirror_restores_rows_from_commitments() {
    let (service, _ledger, store) = service_with_fake();
    let request = two_milestone_request();
    let created = service
        .create_milestone_escrow(NETWORK, request.clone())
        .await
        .unwrap();

    // First milestone releases, then the mirror is wiped.
    service
        .release_milestone(NETWORK, created.escrow_id, 0, None)
        .await
        .unwrap();
    store.clear().await;

    let report = service
        .rebuild_mirror(NETWORK, created.escrow_id, &request.milestones)
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.completed, 1);

    let rows = service.milestones(created.escrow_id).await.unwrap();
    assert_eq!(rows[0].status, MilestoneStatus::Completed);
    assert_eq!(rows[1].status, MilestoneStatus::Pending);

    // Releases continue where the ledger left off.
    service
        .release_milestone(NETWORK, created.escrow_id, 1, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn rebuild_rejects_tampered_definitions() {
    let (service, _ledger, store) = service_with_fake();
    let request = two_milestone_request();
    let created = service
        .create_milestone_escrow(NETWORK, request.clone())
        .await
        .unwrap();
    store.clear().await;

    let mut tampered = request.milestones.clone();
    tampered[0].amount = Decimal::from(500u32);
    tampered[1].amount = Decimal::from(500u32);

    let err = service
        .rebuild_mirror(NETWORK, created.escrow_id, &tampered)
        .await
        .unwrap_err();
    assert!(matches!(err, EscrowError::Validation(_)));
    assert!(service.milestones(created.escrow_id).await.unwrap().is_empty());
}
