//! # Unit of Work
//!
//! Scoped wrapper that owns one [`TransactionCoordinator`] for the duration
//! of one action invocation. Business code never touches adapters directly:
//! the repository-style helpers here translate every write into an
//! [`Operation`] routed through the coordinator, so the compensation and
//! two-phase machinery applies uniformly.
//!
//! A unit of work always resolves: `commit` drives prepare-then-commit,
//! `abort` rolls everything back, and dropping a still-open unit of work
//! aborts it on a best-effort background task. Relying on the drop path is
//! a bug worth logging, not a supported exit.

use crate::adapter::{Adapter, BackendKind, ExecutionOutcome};
use crate::transaction::{Operation, OperationVerb, TransactionCoordinator, TransactionResult};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Scoped transactional write surface handed to actions.
pub struct UnitOfWork {
    coordinator: Arc<TransactionCoordinator>,
    finished: AtomicBool,
}

impl UnitOfWork {
    pub fn new(coordinator: Arc<TransactionCoordinator>) -> Self {
        Self {
            coordinator,
            finished: AtomicBool::new(false),
        }
    }

    pub fn transaction_id(&self) -> Uuid {
        self.coordinator.id()
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }

    /// Register a backend participant for this unit of work.
    pub async fn register(&self, adapter: Arc<dyn Adapter>) -> TransactionResult<()> {
        self.coordinator.register(adapter).await
    }

    /// Insert a row into the relational store. `row` is a JSON object keyed
    /// by column name.
    pub async fn insert_relational(
        &self,
        table: &str,
        row: Value,
    ) -> TransactionResult<ExecutionOutcome> {
        let adapter_id = self.coordinator.participant_of_kind(BackendKind::Relational)?;
        self.coordinator
            .execute(Operation::new(adapter_id, OperationVerb::Insert, table, row))
            .await
    }

    /// Update relational columns for the row with primary key `key`.
    pub async fn update_relational(
        &self,
        table: &str,
        key: Value,
        set: Value,
    ) -> TransactionResult<ExecutionOutcome> {
        let adapter_id = self.coordinator.participant_of_kind(BackendKind::Relational)?;
        self.coordinator
            .execute(Operation::new(
                adapter_id,
                OperationVerb::Update,
                table,
                json!({ "key": key, "set": set }),
            ))
            .await
    }

    /// Delete the relational row with primary key `key`.
    pub async fn delete_relational(
        &self,
        table: &str,
        key: Value,
    ) -> TransactionResult<ExecutionOutcome> {
        let adapter_id = self.coordinator.participant_of_kind(BackendKind::Relational)?;
        self.coordinator
            .execute(Operation::new(
                adapter_id,
                OperationVerb::Delete,
                table,
                json!({ "key": key }),
            ))
            .await
    }

    /// Insert or replace a document in the given collection.
    pub async fn upsert_document(
        &self,
        collection: &str,
        doc_id: &str,
        body: Value,
    ) -> TransactionResult<ExecutionOutcome> {
        let adapter_id = self.coordinator.participant_of_kind(BackendKind::Document)?;
        self.coordinator
            .execute(Operation::new(
                adapter_id,
                OperationVerb::Update,
                collection,
                json!({ "id": doc_id, "body": body }),
            ))
            .await
    }

    /// Delete a document from the given collection.
    pub async fn delete_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> TransactionResult<ExecutionOutcome> {
        let adapter_id = self.coordinator.participant_of_kind(BackendKind::Document)?;
        self.coordinator
            .execute(Operation::new(
                adapter_id,
                OperationVerb::Delete,
                collection,
                json!({ "id": doc_id }),
            ))
            .await
    }

    /// Write a cache entry. Eagerly visible; undone by compensation if the
    /// transaction aborts.
    pub async fn cache_set(&self, key: &str, value: Value) -> TransactionResult<ExecutionOutcome> {
        let adapter_id = self.coordinator.participant_of_kind(BackendKind::Cache)?;
        self.coordinator
            .execute(Operation::new(adapter_id, OperationVerb::CacheSet, key, value))
            .await
    }

    /// Invalidate a cache key. Eagerly visible; the prior value is restored
    /// by compensation if the transaction aborts.
    pub async fn cache_invalidate(&self, key: &str) -> TransactionResult<ExecutionOutcome> {
        let adapter_id = self.coordinator.participant_of_kind(BackendKind::Cache)?;
        self.coordinator
            .execute(Operation::new(
                adapter_id,
                OperationVerb::CacheDelete,
                key,
                Value::Null,
            ))
            .await
    }

    /// Drive prepare-then-commit. On a failed prepare the coordinator has
    /// already aborted every participant.
    pub async fn commit(self) -> TransactionResult<()> {
        self.finished.store(true, Ordering::SeqCst);
        self.coordinator.prepare().await?;
        self.coordinator.commit().await
    }

    /// Explicitly abort this unit of work.
    pub async fn abort(self) -> TransactionResult<()> {
        self.finished.store(true, Ordering::SeqCst);
        self.coordinator.abort().await
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        let coordinator = Arc::clone(&self.coordinator);
        warn!(
            tx_id = %coordinator.id(),
            "Unit of work dropped without commit or abort; aborting in background"
        );
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let phase = coordinator.phase().await;
                if !phase.is_terminal() {
                    if let Err(e) = coordinator.abort().await {
                        warn!(tx_id = %coordinator.id(), error = %e, "Background abort failed");
                    }
                }
            });
        }
    }
}
