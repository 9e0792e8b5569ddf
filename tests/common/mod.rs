//! Shared helpers for the integration suite.
//!
//! Every scenario runs against in-memory backends so the full coordinator
//! and driver paths are exercised without external services.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use lattice_core::adapter::{Adapter, CacheAdapter, CacheDriver, LocalCacheDriver};
use lattice_core::config::CoreConfig;
use lattice_core::events::EventPublisher;
use lattice_core::testing::{InMemoryTwoPhaseAdapter, MemoryStore};
use lattice_core::transaction::{ReconciliationQueue, TransactionCoordinator};
use serde_json::Value;
use std::sync::Arc;

/// The three backend stores behind one test coordinator, kept around so
/// scenarios can assert on what actually became visible.
pub struct TestBackends {
    pub relational_store: Arc<MemoryStore>,
    pub document_store: Arc<MemoryStore>,
    pub cache_driver: Arc<LocalCacheDriver>,
}

impl TestBackends {
    pub fn new() -> Self {
        Self {
            relational_store: MemoryStore::new(),
            document_store: MemoryStore::new(),
            cache_driver: Arc::new(LocalCacheDriver::new()),
        }
    }

    pub fn relational_adapter(&self) -> Arc<dyn Adapter> {
        Arc::new(InMemoryTwoPhaseAdapter::relational(
            "db",
            Arc::clone(&self.relational_store),
        ))
    }

    pub fn document_adapter(&self) -> Arc<dyn Adapter> {
        Arc::new(InMemoryTwoPhaseAdapter::document(
            "docs",
            Arc::clone(&self.document_store),
        ))
    }

    pub fn cache_adapter(&self) -> Arc<dyn Adapter> {
        let driver: Arc<dyn CacheDriver> = Arc::clone(&self.cache_driver) as Arc<dyn CacheDriver>;
        Arc::new(CacheAdapter::new("cache", driver))
    }

    pub async fn cache_value(&self, key: &str) -> Option<Value> {
        self.cache_driver.get(key).await.unwrap()
    }
}

/// Coordinator with test timeouts and a fresh reconciliation queue.
pub fn test_coordinator() -> (Arc<TransactionCoordinator>, Arc<ReconciliationQueue>) {
    let config = CoreConfig::for_testing();
    let events = EventPublisher::default();
    let reconciliation = Arc::new(ReconciliationQueue::new(events.clone()));
    let coordinator = Arc::new(TransactionCoordinator::new(
        config.transaction,
        events,
        Arc::clone(&reconciliation),
    ));
    (coordinator, reconciliation)
}

pub async fn register_all(
    coordinator: &TransactionCoordinator,
    adapters: Vec<Arc<dyn Adapter>>,
) -> anyhow::Result<()> {
    for adapter in adapters {
        coordinator.register(adapter).await?;
    }
    Ok(())
}
