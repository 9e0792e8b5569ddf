//! Lifecycle event system.
//!
//! Phase transitions, state saves, and reconciliation enqueues are published
//! as broadcast events so operational tooling can observe the coordination
//! layer without being wired into it.

pub mod publisher;

pub use publisher::{EventPublisher, PublishedEvent};

/// Well-known lifecycle event names.
pub mod lifecycle {
    pub const TRANSACTION_PREPARED: &str = "transaction.prepared";
    pub const TRANSACTION_COMMITTED: &str = "transaction.committed";
    pub const TRANSACTION_ABORTED: &str = "transaction.aborted";
    pub const TRANSACTION_INDETERMINATE: &str = "transaction.indeterminate";
    pub const RECONCILIATION_ENQUEUED: &str = "reconciliation.enqueued";
    pub const RECONCILIATION_RESOLVED: &str = "reconciliation.resolved";
    pub const STATE_SAVED: &str = "state.saved";
    pub const ACTION_COMPLETED: &str = "action.completed";
}
