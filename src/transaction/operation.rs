//! Operations and the per-transaction operation log.
//!
//! Every write a transaction issues is captured as an [`Operation`] and
//! appended to the [`OperationLog`] in issue order. The log exists for two
//! reasons: compensation replay when a non-two-phase adapter's transaction
//! aborts, and the reconciliation record handed to operators when a
//! transaction lands in the indeterminate phase.

use crate::adapter::AdapterId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Write verbs an operation can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationVerb {
    Insert,
    Update,
    Delete,
    CacheSet,
    CacheDelete,
}

impl fmt::Display for OperationVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::CacheSet => write!(f, "cache_set"),
            Self::CacheDelete => write!(f, "cache_delete"),
        }
    }
}

/// A single write issued against one adapter.
///
/// Operations are never mutated after they are appended to the log;
/// compensation replay order must equal reverse issue order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub adapter_id: AdapterId,
    pub verb: OperationVerb,
    /// Table, collection, or cache key the operation targets.
    pub target: String,
    pub payload: serde_json::Value,
    /// Undo operation recorded for adapters that cannot natively roll back.
    pub compensating_op: Option<Box<Operation>>,
}

impl Operation {
    pub fn new(
        adapter_id: AdapterId,
        verb: OperationVerb,
        target: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            adapter_id,
            verb,
            target: target.into(),
            payload,
            compensating_op: None,
        }
    }

    /// Attach the compensating operation recorded before eager execution.
    pub fn with_compensation(mut self, compensation: Option<Operation>) -> Self {
        self.compensating_op = compensation.map(Box::new);
        self
    }
}

/// Append-only record of the operations issued during one transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationLog {
    entries: Vec<Operation>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation. Issue order is preserved permanently.
    pub fn append(&mut self, op: Operation) {
        self.entries.push(op);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Operation] {
        &self.entries
    }

    /// Operations issued against one adapter, in issue order.
    pub fn ops_for(&self, adapter_id: &AdapterId) -> Vec<&Operation> {
        self.entries
            .iter()
            .filter(|op| &op.adapter_id == adapter_id)
            .collect()
    }

    /// Compensating operations for one adapter, in reverse issue order.
    ///
    /// Replay is idempotent-safe only if the compensations themselves are
    /// idempotent; that is a contract the adapter must honor, the log does
    /// not enforce it.
    pub fn compensations_for(&self, adapter_id: &AdapterId) -> Vec<Operation> {
        self.entries
            .iter()
            .rev()
            .filter(|op| &op.adapter_id == adapter_id)
            .filter_map(|op| op.compensating_op.as_deref().cloned())
            .collect()
    }
}
