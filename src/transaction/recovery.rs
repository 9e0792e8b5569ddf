//! # Indeterminate Transaction Reconciliation
//!
//! A transaction that loses a commit acknowledgment after every participant
//! voted yes cannot resolve its own outcome: some participants may already
//! have committed. The coordinator parks such transactions here as
//! [`ReconciliationRecord`]s carrying the full operation log and the
//! per-participant acknowledgment map.
//!
//! Resolution is always explicit. [`ReconciliationQueue::retry_commit`]
//! idempotently re-sends commit to the participants that never acknowledged;
//! [`ReconciliationQueue::resolve_manually`] is the operator escape hatch.
//! Nothing in this module resolves a pending record on its own.

use crate::adapter::{Adapter, AdapterId};
use crate::events::{lifecycle, EventPublisher};
use crate::transaction::errors::{TransactionError, TransactionResult};
use crate::transaction::operation::OperationLog;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Resolution status of a parked transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Outcome unknown; awaiting retry or operator action.
    Pending,
    /// Every participant eventually acknowledged commit.
    ResolvedCommitted,
    /// An operator determined the transaction's effects were undone.
    ResolvedAborted,
}

/// Everything an operator needs to resolve one indeterminate transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub tx_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    /// Full operation log at the moment the transaction went indeterminate.
    pub operations: OperationLog,
    /// Commit acknowledgment per participant at the moment of failure.
    pub acks: HashMap<AdapterId, bool>,
    pub status: ReconciliationStatus,
}

impl ReconciliationRecord {
    pub fn new(tx_id: Uuid, operations: OperationLog, acks: HashMap<AdapterId, bool>) -> Self {
        Self {
            tx_id,
            recorded_at: Utc::now(),
            operations,
            acks,
            status: ReconciliationStatus::Pending,
        }
    }

    /// Participants that never acknowledged commit.
    pub fn unacked_participants(&self) -> Vec<AdapterId> {
        self.acks
            .iter()
            .filter(|(_, acked)| !**acked)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Operator-facing queue of indeterminate transactions.
#[derive(Debug, Default)]
pub struct ReconciliationQueue {
    records: DashMap<Uuid, ReconciliationRecord>,
    events: EventPublisher,
}

impl ReconciliationQueue {
    pub fn new(events: EventPublisher) -> Self {
        Self {
            records: DashMap::new(),
            events,
        }
    }

    /// Park an indeterminate transaction for reconciliation.
    pub fn enqueue(&self, record: ReconciliationRecord) {
        error!(
            tx_id = %record.tx_id,
            operations = record.operations.len(),
            unacked = ?record.unacked_participants(),
            "Transaction indeterminate; queued for reconciliation"
        );
        self.events.publish(
            lifecycle::RECONCILIATION_ENQUEUED,
            json!({
                "transaction_id": record.tx_id,
                "unacked_participants": record
                    .unacked_participants()
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>(),
            }),
        );
        self.records.insert(record.tx_id, record);
    }

    /// All records still awaiting resolution.
    pub fn pending(&self) -> Vec<ReconciliationRecord> {
        self.records
            .iter()
            .filter(|entry| entry.status == ReconciliationStatus::Pending)
            .map(|entry| entry.clone())
            .collect()
    }

    pub fn get(&self, tx_id: Uuid) -> Option<ReconciliationRecord> {
        self.records.get(&tx_id).map(|entry| entry.clone())
    }

    /// Idempotently re-send commit to every participant that never
    /// acknowledged. Adapters are supplied by the caller (re-checked out
    /// from the pool); a participant that already committed treats the
    /// repeated commit as a no-op per the adapter contract.
    ///
    /// The record moves to `ResolvedCommitted` only when every participant
    /// has acknowledged.
    pub async fn retry_commit(
        &self,
        tx_id: Uuid,
        adapters: &[Arc<dyn Adapter>],
    ) -> TransactionResult<ReconciliationStatus> {
        let unacked = {
            let record = self
                .records
                .get(&tx_id)
                .ok_or_else(|| TransactionError::unknown_participant(tx_id, "reconciliation"))?;
            if record.status != ReconciliationStatus::Pending {
                return Ok(record.status);
            }
            record.unacked_participants()
        };

        let mut newly_acked = Vec::new();
        for adapter_id in &unacked {
            let Some(adapter) = adapters.iter().find(|a| a.id() == adapter_id) else {
                warn!(tx_id = %tx_id, participant = %adapter_id, "No adapter supplied for retry");
                continue;
            };
            match adapter.commit(tx_id).await {
                Ok(()) => {
                    info!(tx_id = %tx_id, participant = %adapter_id, "Commit acknowledged on retry");
                    newly_acked.push(adapter_id.clone());
                }
                Err(e) => {
                    warn!(tx_id = %tx_id, participant = %adapter_id, error = %e, "Commit retry failed");
                }
            }
        }

        let mut record = self
            .records
            .get_mut(&tx_id)
            .ok_or_else(|| TransactionError::unknown_participant(tx_id, "reconciliation"))?;
        for adapter_id in newly_acked {
            record.acks.insert(adapter_id, true);
        }

        if record.acks.values().all(|acked| *acked) {
            record.status = ReconciliationStatus::ResolvedCommitted;
            self.events.publish(
                lifecycle::RECONCILIATION_RESOLVED,
                json!({ "transaction_id": tx_id, "outcome": "committed" }),
            );
        }

        Ok(record.status)
    }

    /// Operator escape hatch: mark a record resolved after out-of-band
    /// cleanup. Only `ResolvedCommitted` / `ResolvedAborted` are accepted.
    pub fn resolve_manually(
        &self,
        tx_id: Uuid,
        outcome: ReconciliationStatus,
    ) -> TransactionResult<()> {
        if outcome == ReconciliationStatus::Pending {
            return Err(TransactionError::unknown_participant(
                tx_id,
                "cannot resolve to pending",
            ));
        }
        let mut record = self
            .records
            .get_mut(&tx_id)
            .ok_or_else(|| TransactionError::unknown_participant(tx_id, "reconciliation"))?;
        record.status = outcome;
        self.events.publish(
            lifecycle::RECONCILIATION_RESOLVED,
            json!({
                "transaction_id": tx_id,
                "outcome": match outcome {
                    ReconciliationStatus::ResolvedCommitted => "committed",
                    ReconciliationStatus::ResolvedAborted => "aborted",
                    ReconciliationStatus::Pending => unreachable!(),
                },
            }),
        );
        Ok(())
    }
}
