//! Test support: in-memory backends and fault injection.
//!
//! The integration suite (and downstream crates' tests) exercise the
//! coordinator against real two-phase semantics without a database: the
//! in-memory adapters stage writes per transaction and apply them only on
//! commit, and [`FaultyAdapter`] injects the failure modes the coordinator
//! must survive (no votes, execute failures, lost commit acknowledgments).

use crate::adapter::{
    Adapter, AdapterError, AdapterId, AdapterResult, BackendKind, ExecutionOutcome,
};
use crate::transaction::operation::{Operation, OperationVerb};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared visible store behind an in-memory adapter:
/// `target -> key -> value`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    visible: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, target: &str, key: &str) -> Option<Value> {
        self.visible
            .lock()
            .get(target)
            .and_then(|rows| rows.get(key).cloned())
    }

    pub fn len(&self, target: &str) -> usize {
        self.visible.lock().get(target).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, target: &str) -> bool {
        self.len(target) == 0
    }

    fn apply(&self, op: &Operation) {
        let mut visible = self.visible.lock();
        match op.verb {
            OperationVerb::Insert | OperationVerb::Update => {
                let key = row_key(op);
                let body = op
                    .payload
                    .get("body")
                    .or_else(|| op.payload.get("set"))
                    .unwrap_or(&op.payload)
                    .clone();
                visible
                    .entry(op.target.clone())
                    .or_default()
                    .insert(key, body);
            }
            OperationVerb::Delete => {
                let key = row_key(op);
                if let Some(rows) = visible.get_mut(&op.target) {
                    rows.remove(&key);
                }
            }
            _ => {}
        }
    }
}

fn row_key(op: &Operation) -> String {
    op.payload
        .get("id")
        .or_else(|| op.payload.get("key"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

/// In-memory adapter with genuine two-phase semantics: execute stages,
/// prepare votes, commit applies, rollback discards.
pub struct InMemoryTwoPhaseAdapter {
    id: AdapterId,
    kind: BackendKind,
    store: Arc<MemoryStore>,
    staged: Mutex<Vec<Operation>>,
    prepared: Mutex<Option<Uuid>>,
}

impl InMemoryTwoPhaseAdapter {
    pub fn new(id: impl Into<AdapterId>, kind: BackendKind, store: Arc<MemoryStore>) -> Self {
        Self {
            id: id.into(),
            kind,
            store,
            staged: Mutex::new(Vec::new()),
            prepared: Mutex::new(None),
        }
    }

    pub fn relational(id: impl Into<AdapterId>, store: Arc<MemoryStore>) -> Self {
        Self::new(id, BackendKind::Relational, store)
    }

    pub fn document(id: impl Into<AdapterId>, store: Arc<MemoryStore>) -> Self {
        Self::new(id, BackendKind::Document, store)
    }

    pub fn staged_count(&self) -> usize {
        self.staged.lock().len()
    }

    /// Transaction this adapter has voted yes for, if any.
    pub fn prepared_tx(&self) -> Option<Uuid> {
        *self.prepared.lock()
    }
}

#[async_trait]
impl Adapter for InMemoryTwoPhaseAdapter {
    fn id(&self) -> &AdapterId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports_two_phase(&self) -> bool {
        true
    }

    async fn connect(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn execute(&self, op: &Operation) -> AdapterResult<ExecutionOutcome> {
        match op.verb {
            OperationVerb::Insert | OperationVerb::Update | OperationVerb::Delete => {
                self.staged.lock().push(op.clone());
                Ok(ExecutionOutcome::affected(1))
            }
            other => Err(AdapterError::invalid_operation(
                &self.id,
                op,
                format!("verb {other} is not supported by this backend"),
            )),
        }
    }

    async fn prepare(&self, tx_id: Uuid) -> AdapterResult<()> {
        *self.prepared.lock() = Some(tx_id);
        Ok(())
    }

    async fn commit(&self, _tx_id: Uuid) -> AdapterResult<()> {
        let staged: Vec<Operation> = {
            let mut guard = self.staged.lock();
            std::mem::take(&mut *guard)
        };
        // Re-sending commit to an already-committed transaction is a no-op,
        // which is what reconciliation retries rely on.
        for op in &staged {
            self.store.apply(op);
        }
        *self.prepared.lock() = None;
        Ok(())
    }

    async fn rollback(&self, _tx_id: Uuid) -> AdapterResult<()> {
        self.staged.lock().clear();
        *self.prepared.lock() = None;
        Ok(())
    }
}

/// Failure modes injectable into an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// `execute` fails.
    FailExecute,
    /// `prepare` votes no.
    VoteNo,
    /// `prepare` hangs past any reasonable timeout.
    PrepareHang,
    /// `commit` applies on the backend but the acknowledgment is lost.
    LoseCommitAck,
}

/// Wraps an adapter and injects one failure mode. The fault can be cleared
/// to model recovery (e.g. a commit retry that succeeds) or armed late via
/// [`set_fault`](Self::set_fault) to model a backend that fails partway
/// through a transaction, after its eager writes already landed but before
/// their compensations replay.
pub struct FaultyAdapter {
    inner: Arc<dyn Adapter>,
    fault: Mutex<Option<FaultPoint>>,
}

impl FaultyAdapter {
    pub fn new(inner: Arc<dyn Adapter>, fault: FaultPoint) -> Self {
        Self {
            inner,
            fault: Mutex::new(Some(fault)),
        }
    }

    /// Wrapper with no fault armed; behaves as the inner adapter until
    /// [`set_fault`](Self::set_fault) is called.
    pub fn dormant(inner: Arc<dyn Adapter>) -> Self {
        Self {
            inner,
            fault: Mutex::new(None),
        }
    }

    pub fn set_fault(&self, point: FaultPoint) {
        *self.fault.lock() = Some(point);
    }

    pub fn clear_fault(&self) {
        *self.fault.lock() = None;
    }

    fn active(&self, point: FaultPoint) -> bool {
        *self.fault.lock() == Some(point)
    }
}

#[async_trait]
impl Adapter for FaultyAdapter {
    fn id(&self) -> &AdapterId {
        self.inner.id()
    }

    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn supports_two_phase(&self) -> bool {
        self.inner.supports_two_phase()
    }

    async fn connect(&self) -> AdapterResult<()> {
        self.inner.connect().await
    }

    async fn execute(&self, op: &Operation) -> AdapterResult<ExecutionOutcome> {
        if self.active(FaultPoint::FailExecute) {
            return Err(AdapterError::execution(
                self.inner.id(),
                op,
                "injected execute failure",
            ));
        }
        self.inner.execute(op).await
    }

    async fn compensation_for(&self, op: &Operation) -> AdapterResult<Option<Operation>> {
        self.inner.compensation_for(op).await
    }

    async fn prepare(&self, tx_id: Uuid) -> AdapterResult<()> {
        if self.active(FaultPoint::VoteNo) {
            return Err(AdapterError::connection(
                self.inner.id(),
                "injected no vote",
            ));
        }
        if self.active(FaultPoint::PrepareHang) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.prepare(tx_id).await
    }

    async fn commit(&self, tx_id: Uuid) -> AdapterResult<()> {
        if self.active(FaultPoint::LoseCommitAck) {
            // The backend commits; only the acknowledgment is lost.
            self.inner.commit(tx_id).await?;
            return Err(AdapterError::connection(
                self.inner.id(),
                "injected lost commit acknowledgment",
            ));
        }
        self.inner.commit(tx_id).await
    }

    async fn rollback(&self, tx_id: Uuid) -> AdapterResult<()> {
        self.inner.rollback(tx_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(id: &str, target: &str, row: Value) -> Operation {
        Operation::new(AdapterId::new(id), OperationVerb::Insert, target, row)
    }

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let store = MemoryStore::new();
        let adapter = InMemoryTwoPhaseAdapter::relational("db", Arc::clone(&store));
        let tx_id = Uuid::new_v4();

        adapter
            .execute(&insert("db", "orders", json!({ "id": "o1", "total": 10 })))
            .await
            .unwrap();
        assert!(store.is_empty("orders"));
        assert_eq!(adapter.staged_count(), 1);

        adapter.prepare(tx_id).await.unwrap();
        adapter.commit(tx_id).await.unwrap();
        assert_eq!(store.len("orders"), 1);
        assert_eq!(store.get("orders", "o1").unwrap()["total"], 10);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryStore::new();
        let adapter = InMemoryTwoPhaseAdapter::relational("db", Arc::clone(&store));
        let tx_id = Uuid::new_v4();

        adapter
            .execute(&insert("db", "orders", json!({ "id": "o1" })))
            .await
            .unwrap();
        adapter.rollback(tx_id).await.unwrap();

        assert!(store.is_empty("orders"));
        assert_eq!(adapter.staged_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_retry_is_idempotent() {
        let store = MemoryStore::new();
        let adapter = InMemoryTwoPhaseAdapter::relational("db", Arc::clone(&store));
        let tx_id = Uuid::new_v4();

        adapter
            .execute(&insert("db", "orders", json!({ "id": "o1" })))
            .await
            .unwrap();
        adapter.prepare(tx_id).await.unwrap();
        adapter.commit(tx_id).await.unwrap();
        adapter.commit(tx_id).await.unwrap();
        assert_eq!(store.len("orders"), 1);
    }

    #[tokio::test]
    async fn test_lost_ack_still_commits_backend() {
        let store = MemoryStore::new();
        let inner = Arc::new(InMemoryTwoPhaseAdapter::relational("db", Arc::clone(&store)));
        let faulty = FaultyAdapter::new(inner, FaultPoint::LoseCommitAck);
        let tx_id = Uuid::new_v4();

        faulty
            .execute(&insert("db", "orders", json!({ "id": "o1" })))
            .await
            .unwrap();
        faulty.prepare(tx_id).await.unwrap();

        assert!(faulty.commit(tx_id).await.is_err());
        // The backend really committed; only the ack was lost.
        assert_eq!(store.len("orders"), 1);
    }
}
