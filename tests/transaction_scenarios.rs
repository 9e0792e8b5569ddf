//! End-to-end transaction scenarios across the three backend kinds.
//!
//! Each scenario drives a coordinator against in-memory two-phase backends
//! and a real compensating cache adapter, then asserts on what actually
//! became visible in every store.

mod common;

use anyhow::Result;
use common::{register_all, test_coordinator, TestBackends};
use lattice_core::adapter::{AdapterId, CacheDriver};
use lattice_core::testing::{FaultPoint, FaultyAdapter, InMemoryTwoPhaseAdapter};
use lattice_core::transaction::{ReconciliationStatus, TransactionError, TransactionPhase};
use lattice_core::uow::UnitOfWork;
use serde_json::json;
use std::sync::Arc;

/// All three backends commit together and every write becomes visible.
#[tokio::test]
async fn commit_spans_relational_document_and_cache() -> Result<()> {
    let backends = TestBackends::new();
    let (coordinator, _) = test_coordinator();
    register_all(
        &coordinator,
        vec![
            backends.relational_adapter(),
            backends.document_adapter(),
            backends.cache_adapter(),
        ],
    )
    .await?;

    let uow = UnitOfWork::new(Arc::clone(&coordinator));
    uow.insert_relational("orders", json!({ "id": "o1", "total": 42 }))
        .await?;
    uow.upsert_document("order_events", "o1", json!({ "status": "placed" }))
        .await?;
    uow.cache_set("order:o1", json!({ "total": 42 })).await?;
    uow.commit().await?;

    assert_eq!(coordinator.phase().await, TransactionPhase::Committed);
    assert_eq!(
        backends.relational_store.get("orders", "o1").unwrap()["total"],
        42
    );
    assert_eq!(
        backends.document_store.get("order_events", "o1").unwrap()["status"],
        "placed"
    );
    assert_eq!(
        backends.cache_value("order:o1").await.unwrap()["total"],
        42
    );
    Ok(())
}

/// A no vote from the document store rolls back the staged relational write
/// and restores the cache key to its pre-transaction value.
#[tokio::test]
async fn no_vote_rolls_back_and_restores_cache() -> Result<()> {
    let backends = TestBackends::new();
    backends
        .cache_driver
        .set("greeting", json!("old"))
        .await?;

    let (coordinator, _) = test_coordinator();
    let faulty_docs = Arc::new(FaultyAdapter::new(
        backends.document_adapter(),
        FaultPoint::VoteNo,
    ));
    register_all(
        &coordinator,
        vec![
            backends.relational_adapter(),
            faulty_docs,
            backends.cache_adapter(),
        ],
    )
    .await?;

    let uow = UnitOfWork::new(Arc::clone(&coordinator));
    uow.insert_relational("orders", json!({ "id": "o1" })).await?;
    uow.upsert_document("order_events", "o1", json!({ "status": "placed" }))
        .await?;
    // Overwrites an existing key; compensation must restore, not delete.
    uow.cache_set("greeting", json!("new")).await?;

    let err = uow.commit().await.unwrap_err();
    assert!(matches!(err, TransactionError::PrepareFailed { ref participant, .. } if participant == "docs"));
    assert!(err.is_locally_recoverable());

    assert_eq!(coordinator.phase().await, TransactionPhase::Aborted);
    assert!(backends.relational_store.is_empty("orders"));
    assert!(backends.document_store.is_empty("order_events"));
    assert_eq!(backends.cache_value("greeting").await.unwrap(), json!("old"));
    Ok(())
}

/// An eager cache write followed by a relational execute failure: the
/// caller aborts and compensation deletes the key that did not exist before.
#[tokio::test]
async fn execute_failure_after_cache_write_undoes_cache() -> Result<()> {
    let backends = TestBackends::new();
    let (coordinator, _) = test_coordinator();
    let faulty_db = Arc::new(FaultyAdapter::new(
        backends.relational_adapter(),
        FaultPoint::FailExecute,
    ));
    register_all(
        &coordinator,
        vec![faulty_db, backends.cache_adapter()],
    )
    .await?;

    let uow = UnitOfWork::new(Arc::clone(&coordinator));
    uow.cache_set("order:o1", json!({ "total": 42 })).await?;
    // Tentatively visible until the transaction resolves.
    assert!(backends.cache_value("order:o1").await.is_some());

    assert!(uow
        .insert_relational("orders", json!({ "id": "o1" }))
        .await
        .is_err());
    uow.abort().await?;

    assert_eq!(coordinator.phase().await, TransactionPhase::Aborted);
    assert!(backends.cache_value("order:o1").await.is_none());
    Ok(())
}

/// A participant that hangs in prepare counts as a no vote once the
/// per-participant timeout elapses.
#[tokio::test]
async fn prepare_timeout_counts_as_no_vote() -> Result<()> {
    let backends = TestBackends::new();
    let (coordinator, _) = test_coordinator();
    let hanging_docs = Arc::new(FaultyAdapter::new(
        backends.document_adapter(),
        FaultPoint::PrepareHang,
    ));
    register_all(
        &coordinator,
        vec![backends.relational_adapter(), hanging_docs],
    )
    .await?;

    let uow = UnitOfWork::new(Arc::clone(&coordinator));
    uow.insert_relational("orders", json!({ "id": "o1" })).await?;
    uow.upsert_document("order_events", "o1", json!({})).await?;

    let err = uow.commit().await.unwrap_err();
    assert!(matches!(err, TransactionError::PrepareFailed { ref participant, .. } if participant == "docs"));
    assert_eq!(coordinator.phase().await, TransactionPhase::Aborted);
    assert!(backends.relational_store.is_empty("orders"));
    Ok(())
}

/// A lost commit acknowledgment after unanimous yes votes parks the
/// transaction as indeterminate with its full operation log; an explicit
/// retry resolves it once the participant is reachable again.
#[tokio::test]
async fn lost_commit_ack_goes_to_reconciliation() -> Result<()> {
    let backends = TestBackends::new();
    let (coordinator, reconciliation) = test_coordinator();
    let flaky_docs = Arc::new(FaultyAdapter::new(
        backends.document_adapter(),
        FaultPoint::LoseCommitAck,
    ));
    register_all(
        &coordinator,
        vec![
            backends.relational_adapter(),
            Arc::clone(&flaky_docs) as Arc<dyn lattice_core::Adapter>,
        ],
    )
    .await?;
    let tx_id = coordinator.id();

    let uow = UnitOfWork::new(Arc::clone(&coordinator));
    uow.insert_relational("orders", json!({ "id": "o1" })).await?;
    uow.upsert_document("order_events", "o1", json!({ "status": "placed" }))
        .await?;

    let err = uow.commit().await.unwrap_err();
    assert!(matches!(err, TransactionError::CommitIndeterminate { .. }));
    assert!(!err.is_locally_recoverable());
    assert_eq!(coordinator.phase().await, TransactionPhase::Indeterminate);

    // The record carries everything an operator needs.
    let record = reconciliation.get(tx_id).unwrap();
    assert_eq!(record.status, ReconciliationStatus::Pending);
    assert_eq!(record.operations.len(), 2);
    assert_eq!(
        record.unacked_participants(),
        vec!["docs".into()]
    );

    // The queue never resolves a record on its own.
    assert_eq!(reconciliation.pending().len(), 1);
    assert_eq!(
        reconciliation.get(tx_id).unwrap().status,
        ReconciliationStatus::Pending
    );

    // Participant recovers; an idempotent commit retry resolves the record.
    flaky_docs.clear_fault();
    let recovered: Vec<Arc<dyn lattice_core::adapter::Adapter>> = vec![Arc::clone(&flaky_docs) as Arc<dyn lattice_core::Adapter>];
    let status = reconciliation.retry_commit(tx_id, &recovered).await?;
    assert_eq!(status, ReconciliationStatus::ResolvedCommitted);
    assert!(reconciliation.pending().is_empty());

    // Both backends ended up committed: the ack was lost, not the commit.
    assert_eq!(backends.relational_store.len("orders"), 1);
    assert_eq!(backends.document_store.len("order_events"), 1);
    Ok(())
}

/// The coordinator rejects duplicate participants and writes issued after
/// the vote has started.
#[tokio::test]
async fn invalid_usage_is_a_programming_error() -> Result<()> {
    let backends = TestBackends::new();
    let (coordinator, _) = test_coordinator();
    register_all(&coordinator, vec![backends.relational_adapter()]).await?;

    let dup = coordinator.register(backends.relational_adapter()).await;
    assert!(matches!(
        dup.unwrap_err(),
        TransactionError::DuplicateParticipant { .. }
    ));

    coordinator
        .execute(lattice_core::transaction::Operation::new(
            "db".into(),
            lattice_core::transaction::OperationVerb::Insert,
            "orders",
            json!({ "id": "o1" }),
        ))
        .await?;
    coordinator.prepare().await?;

    let late = coordinator
        .execute(lattice_core::transaction::Operation::new(
            "db".into(),
            lattice_core::transaction::OperationVerb::Insert,
            "orders",
            json!({ "id": "o2" }),
        ))
        .await;
    assert!(matches!(
        late.unwrap_err(),
        TransactionError::InvalidTransactionState { .. }
    ));

    coordinator.commit().await?;
    assert_eq!(backends.relational_store.len("orders"), 1);
    Ok(())
}

/// Abort on an already-aborted transaction is an accepted no-op; abort from
/// a committed transaction is not.
#[tokio::test]
async fn abort_is_idempotent_only_after_abort() -> Result<()> {
    let backends = TestBackends::new();
    let (coordinator, _) = test_coordinator();
    register_all(&coordinator, vec![backends.relational_adapter()]).await?;

    coordinator.abort().await?;
    assert_eq!(coordinator.phase().await, TransactionPhase::Aborted);
    coordinator.abort().await?;

    let (committed, _) = test_coordinator();
    register_all(&committed, vec![backends.relational_adapter()]).await?;
    committed.prepare().await?;
    committed.commit().await?;
    assert!(matches!(
        committed.abort().await.unwrap_err(),
        TransactionError::InvalidTransactionState { .. }
    ));
    Ok(())
}

/// A compensation replay that fails during abort leaves cleanup unfinished:
/// the error surfaces as `AbortIncomplete` instead of being swallowed, and
/// the operation log with its compensations survives for manual cleanup.
#[tokio::test]
async fn failed_compensation_replay_surfaces_abort_incomplete() -> Result<()> {
    let backends = TestBackends::new();
    backends.cache_driver.set("greeting", json!("old")).await?;

    let (coordinator, _) = test_coordinator();
    let flaky_cache = Arc::new(FaultyAdapter::dormant(backends.cache_adapter()));
    register_all(
        &coordinator,
        vec![
            backends.relational_adapter(),
            Arc::clone(&flaky_cache) as Arc<dyn lattice_core::Adapter>,
        ],
    )
    .await?;

    let uow = UnitOfWork::new(Arc::clone(&coordinator));
    uow.insert_relational("orders", json!({ "id": "o1" })).await?;
    uow.cache_set("greeting", json!("new")).await?;

    // The cache backend goes down after its eager write landed but before
    // the compensation can replay.
    flaky_cache.set_fault(FaultPoint::FailExecute);

    let err = uow.abort().await.unwrap_err();
    assert!(matches!(err, TransactionError::AbortIncomplete { .. }));
    assert!(!err.is_locally_recoverable());

    // The transaction still reaches Aborted; the incomplete cleanup is
    // reported, not hidden behind a stuck phase.
    assert_eq!(coordinator.phase().await, TransactionPhase::Aborted);

    // Everything an operator needs to finish the cleanup is retained.
    let log = coordinator.operation_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log.compensations_for(&AdapterId::new("cache")).len(), 1);

    // The two-phase participant rolled back; only the cache write leaked.
    assert!(backends.relational_store.is_empty("orders"));
    assert_eq!(backends.cache_value("greeting").await.unwrap(), json!("new"));
    Ok(())
}

/// Compensations replay in reverse issue order, so layered writes to the
/// same key unwind back to the original value.
#[tokio::test]
async fn compensations_unwind_in_reverse_order() -> Result<()> {
    let backends = TestBackends::new();
    backends.cache_driver.set("k", json!(0)).await?;

    let (coordinator, _) = test_coordinator();
    // A two-phase participant that votes no forces the abort path.
    let veto = Arc::new(FaultyAdapter::new(
        Arc::new(InMemoryTwoPhaseAdapter::relational(
            "db",
            Arc::clone(&backends.relational_store),
        )),
        FaultPoint::VoteNo,
    ));
    register_all(&coordinator, vec![veto, backends.cache_adapter()]).await?;

    let uow = UnitOfWork::new(Arc::clone(&coordinator));
    uow.cache_set("k", json!(1)).await?;
    uow.cache_set("k", json!(2)).await?;
    uow.cache_invalidate("k").await?;
    assert!(uow.commit().await.is_err());

    assert_eq!(backends.cache_value("k").await.unwrap(), json!(0));
    Ok(())
}
