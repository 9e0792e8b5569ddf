//! Adapter checkout pool.
//!
//! A single adapter connection must never serve two concurrent transactions:
//! held backend transactions and compensation state are per-transaction.
//! Adapters are registered with the pool once at startup and checked out per
//! transaction; the checkout guard returns the adapter on drop.

use crate::adapter::{Adapter, AdapterError, AdapterId, AdapterResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Pool of backend adapters, keyed by adapter id.
#[derive(Default)]
pub struct AdapterPool {
    available: Mutex<HashMap<AdapterId, VecDeque<Arc<dyn Adapter>>>>,
}

impl AdapterPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add an adapter instance to the pool.
    pub fn add(&self, adapter: Arc<dyn Adapter>) {
        self.available
            .lock()
            .entry(adapter.id().clone())
            .or_default()
            .push_back(adapter);
    }

    /// Check out the adapter with the given id for one transaction.
    pub fn checkout(self: &Arc<Self>, adapter_id: &AdapterId) -> AdapterResult<CheckedOutAdapter> {
        let adapter = self
            .available
            .lock()
            .get_mut(adapter_id)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| AdapterError::Connection {
                adapter_id: adapter_id.to_string(),
                message: "no adapter instance available in pool".to_string(),
            })?;
        debug!(adapter = %adapter_id, "Adapter checked out");
        Ok(CheckedOutAdapter {
            adapter: Some(adapter),
            pool: Arc::clone(self),
        })
    }

    /// Instances currently available for the given id.
    pub fn available_count(&self, adapter_id: &AdapterId) -> usize {
        self.available
            .lock()
            .get(adapter_id)
            .map_or(0, VecDeque::len)
    }

    fn checkin(&self, adapter: Arc<dyn Adapter>) {
        debug!(adapter = %adapter.id(), "Adapter returned to pool");
        self.available
            .lock()
            .entry(adapter.id().clone())
            .or_default()
            .push_back(adapter);
    }
}

/// Guard over a checked-out adapter; returns it to the pool on drop.
pub struct CheckedOutAdapter {
    adapter: Option<Arc<dyn Adapter>>,
    pool: Arc<AdapterPool>,
}

impl CheckedOutAdapter {
    pub fn adapter(&self) -> Arc<dyn Adapter> {
        // Invariant: `adapter` is only None after drop.
        Arc::clone(self.adapter.as_ref().unwrap())
    }
}

impl Drop for CheckedOutAdapter {
    fn drop(&mut self) {
        if let Some(adapter) = self.adapter.take() {
            self.pool.checkin(adapter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::CacheAdapter;

    #[test]
    fn test_checkout_and_return() {
        let pool = AdapterPool::new();
        pool.add(Arc::new(CacheAdapter::local("cache")));

        let id = AdapterId::new("cache");
        assert_eq!(pool.available_count(&id), 1);

        let checked_out = pool.checkout(&id).unwrap();
        assert_eq!(pool.available_count(&id), 0);
        // A second transaction cannot grab the same instance.
        assert!(pool.checkout(&id).is_err());

        drop(checked_out);
        assert_eq!(pool.available_count(&id), 1);
    }

    #[test]
    fn test_checkout_unknown_adapter_fails() {
        let pool = AdapterPool::new();
        assert!(pool.checkout(&AdapterId::new("missing")).is_err());
    }
}
