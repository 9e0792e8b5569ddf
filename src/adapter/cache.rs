//! Cache adapter: eager execution with compensation.
//!
//! The cache backend cannot vote in two-phase commit, so writes apply
//! immediately and are *tentatively visible* to other readers for the
//! duration of the transaction. Before each write the adapter captures the
//! key's prior value and hands back a compensating operation; if the
//! transaction aborts, the coordinator replays those compensations in
//! reverse issue order, restoring the pre-transaction value (or deleting a
//! key that did not exist before).

use crate::adapter::{
    Adapter, AdapterError, AdapterId, AdapterResult, BackendKind, ExecutionOutcome,
};
use crate::transaction::operation::{Operation, OperationVerb};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// Thin driver contract the cache adapter executes against.
#[async_trait]
pub trait CacheDriver: Send + Sync {
    async fn get(&self, key: &str) -> AdapterResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> AdapterResult<()>;
    async fn delete(&self, key: &str) -> AdapterResult<bool>;
}

/// In-process cache driver over a concurrent map.
#[derive(Debug, Default)]
pub struct LocalCacheDriver {
    entries: DashMap<String, Value>,
}

impl LocalCacheDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheDriver for LocalCacheDriver {
    async fn get(&self, key: &str) -> AdapterResult<Option<Value>> {
        Ok(self.entries.get(key).map(|entry| entry.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> AdapterResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AdapterResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// Compensating (non-two-phase) adapter for the cache backend.
pub struct CacheAdapter {
    id: AdapterId,
    driver: Arc<dyn CacheDriver>,
}

impl CacheAdapter {
    pub fn new(id: impl Into<AdapterId>, driver: Arc<dyn CacheDriver>) -> Self {
        Self {
            id: id.into(),
            driver,
        }
    }

    pub fn local(id: impl Into<AdapterId>) -> Self {
        Self::new(id, Arc::new(LocalCacheDriver::new()))
    }

    pub fn driver(&self) -> &Arc<dyn CacheDriver> {
        &self.driver
    }
}

#[async_trait]
impl Adapter for CacheAdapter {
    fn id(&self) -> &AdapterId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cache
    }

    fn supports_two_phase(&self) -> bool {
        false
    }

    async fn connect(&self) -> AdapterResult<()> {
        // A driver round trip is the liveness check.
        self.driver.get("__lattice_ping").await.map(|_| ())
    }

    async fn execute(&self, op: &Operation) -> AdapterResult<ExecutionOutcome> {
        match op.verb {
            OperationVerb::CacheSet => {
                self.driver.set(&op.target, op.payload.clone()).await?;
                Ok(ExecutionOutcome::affected(1))
            }
            OperationVerb::CacheDelete => {
                let existed = self.driver.delete(&op.target).await?;
                Ok(ExecutionOutcome::affected(u64::from(existed)))
            }
            other => Err(AdapterError::invalid_operation(
                &self.id,
                op,
                format!("verb {other} is not a cache operation"),
            )),
        }
    }

    /// Capture the undo for `op` from the key's current value. Restores are
    /// idempotent: replaying a restore twice leaves the same value.
    async fn compensation_for(&self, op: &Operation) -> AdapterResult<Option<Operation>> {
        match op.verb {
            OperationVerb::CacheSet | OperationVerb::CacheDelete => {
                let prior = self.driver.get(&op.target).await?;
                let compensation = match prior {
                    Some(value) => Operation::new(
                        self.id.clone(),
                        OperationVerb::CacheSet,
                        op.target.clone(),
                        value,
                    ),
                    None => Operation::new(
                        self.id.clone(),
                        OperationVerb::CacheDelete,
                        op.target.clone(),
                        Value::Null,
                    ),
                };
                Ok(Some(compensation))
            }
            _ => Err(AdapterError::invalid_operation(
                &self.id,
                op,
                "cannot compensate a non-cache operation",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set_op(key: &str, value: Value) -> Operation {
        Operation::new(AdapterId::new("cache"), OperationVerb::CacheSet, key, value)
    }

    #[tokio::test]
    async fn test_set_and_delete() {
        let adapter = CacheAdapter::local("cache");
        adapter.execute(&set_op("greeting", json!("hello"))).await.unwrap();
        assert_eq!(
            adapter.driver().get("greeting").await.unwrap(),
            Some(json!("hello"))
        );

        let delete = Operation::new(
            AdapterId::new("cache"),
            OperationVerb::CacheDelete,
            "greeting",
            Value::Null,
        );
        let outcome = adapter.execute(&delete).await.unwrap();
        assert_eq!(outcome.affected, 1);
        assert_eq!(adapter.driver().get("greeting").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compensation_restores_prior_value() {
        let adapter = CacheAdapter::local("cache");
        adapter.execute(&set_op("k", json!("before"))).await.unwrap();

        let overwrite = set_op("k", json!("after"));
        let compensation = adapter.compensation_for(&overwrite).await.unwrap().unwrap();
        adapter.execute(&overwrite).await.unwrap();
        assert_eq!(adapter.driver().get("k").await.unwrap(), Some(json!("after")));

        adapter.execute(&compensation).await.unwrap();
        assert_eq!(
            adapter.driver().get("k").await.unwrap(),
            Some(json!("before"))
        );
    }

    #[tokio::test]
    async fn test_compensation_for_fresh_key_is_delete() {
        let adapter = CacheAdapter::local("cache");
        let op = set_op("fresh", json!(1));
        let compensation = adapter.compensation_for(&op).await.unwrap().unwrap();
        assert_eq!(compensation.verb, OperationVerb::CacheDelete);

        adapter.execute(&op).await.unwrap();
        adapter.execute(&compensation).await.unwrap();
        assert_eq!(adapter.driver().get("fresh").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_relational_verbs() {
        let adapter = CacheAdapter::local("cache");
        let op = Operation::new(
            AdapterId::new("cache"),
            OperationVerb::Insert,
            "orders",
            json!({}),
        );
        assert!(adapter.execute(&op).await.is_err());
    }
}
