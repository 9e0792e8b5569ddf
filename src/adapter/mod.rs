//! # Backend Adapters
//!
//! One adapter per backend kind (relational, document, cache). An adapter
//! wraps a connection to a single backend and exposes the operation-execution
//! contract the [`TransactionCoordinator`](crate::transaction::TransactionCoordinator)
//! orchestrates, plus optional two-phase hooks for backends that support them.
//!
//! ## Two-Phase Capability
//!
//! Adapters declare their capability through [`Adapter::supports_two_phase`]:
//!
//! - **Native two-phase** adapters (relational, document) buffer writes in a
//!   backend transaction. Writes stay provisional until the coordinator drives
//!   `prepare` / `commit`, and `rollback` discards them without a trace.
//! - **Compensating** adapters (cache) execute eagerly. Their writes are
//!   *tentatively visible* to other readers during the transaction window; if
//!   the transaction aborts, the coordinator replays the compensating
//!   operations the adapter supplied via [`Adapter::compensation_for`], in
//!   reverse issue order. Callers must not assume full isolation from a
//!   compensating adapter.
//!
//! An adapter instance is owned by exactly one transaction at a time; the
//! [`AdapterPool`] enforces the checkout-per-transaction discipline.

pub mod cache;
pub mod document;
pub mod pool;
pub mod relational;

use crate::transaction::operation::Operation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub use cache::{CacheAdapter, CacheDriver, LocalCacheDriver};
pub use document::DocumentAdapter;
pub use pool::AdapterPool;
pub use relational::RelationalAdapter;

/// Identifies a backend participant within one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdapterId(String);

impl AdapterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AdapterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Backend kind of an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Relational,
    Document,
    Cache,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relational => write!(f, "relational"),
            Self::Document => write!(f, "document"),
            Self::Cache => write!(f, "cache"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relational" => Ok(Self::Relational),
            "document" => Ok(Self::Document),
            "cache" => Ok(Self::Cache),
            _ => Err(format!("Invalid backend kind: {s}")),
        }
    }
}

/// Outcome of executing a single operation against a backend.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// Rows / documents / keys affected.
    pub affected: u64,
    /// Backend-returned data, when the operation produces any.
    pub data: Option<Value>,
}

impl ExecutionOutcome {
    pub fn affected(count: u64) -> Self {
        Self {
            affected: count,
            data: None,
        }
    }

    pub fn with_data(count: u64, data: Value) -> Self {
        Self {
            affected: count,
            data: Some(data),
        }
    }
}

/// Contract every backend participant implements.
///
/// `prepare` / `commit` / `rollback` have defaults that reject the call for
/// adapters that declared `supports_two_phase() == false`; the coordinator
/// never invokes them on such adapters.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn id(&self) -> &AdapterId;

    fn kind(&self) -> BackendKind;

    /// Whether this adapter's backend can natively vote in two-phase commit.
    fn supports_two_phase(&self) -> bool;

    /// Verify the backend is reachable.
    async fn connect(&self) -> AdapterResult<()>;

    /// Execute one operation. For native two-phase adapters the effect is
    /// provisional until `commit`; for compensating adapters it is
    /// immediately visible.
    async fn execute(&self, op: &Operation) -> AdapterResult<ExecutionOutcome>;

    /// Build the operation that would undo `op`, capturing whatever prior
    /// state the undo needs. Compensating adapters must implement this;
    /// native two-phase adapters roll back through the backend instead.
    async fn compensation_for(&self, _op: &Operation) -> AdapterResult<Option<Operation>> {
        Ok(None)
    }

    /// Vote on whether the adapter can commit transaction `tx_id`.
    async fn prepare(&self, _tx_id: Uuid) -> AdapterResult<()> {
        Err(AdapterError::two_phase_unsupported(self.id()))
    }

    /// Make the provisional writes of `tx_id` durable.
    async fn commit(&self, _tx_id: Uuid) -> AdapterResult<()> {
        Err(AdapterError::two_phase_unsupported(self.id()))
    }

    /// Discard the provisional writes of `tx_id`.
    async fn rollback(&self, _tx_id: Uuid) -> AdapterResult<()> {
        Err(AdapterError::two_phase_unsupported(self.id()))
    }
}

/// Adapter-level error types.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Connection error on adapter {adapter_id}: {message}")]
    Connection { adapter_id: String, message: String },

    #[error("Execution error on adapter {adapter_id}: {verb} {target}: {message}")]
    Execution {
        adapter_id: String,
        verb: String,
        target: String,
        message: String,
    },

    #[error("Adapter {adapter_id} does not support two-phase commit")]
    TwoPhaseUnsupported { adapter_id: String },

    #[error("Adapter {adapter_id} has no open backend transaction for {tx_id}")]
    UnknownTransaction { adapter_id: String, tx_id: Uuid },

    #[error("Adapter {adapter_id} rejected {verb} for target {target}: {reason}")]
    InvalidOperation {
        adapter_id: String,
        verb: String,
        target: String,
        reason: String,
    },

    #[error("Invalid identifier {identifier:?}: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },
}

impl AdapterError {
    pub fn connection(adapter_id: &AdapterId, message: impl Into<String>) -> Self {
        Self::Connection {
            adapter_id: adapter_id.to_string(),
            message: message.into(),
        }
    }

    pub fn execution(adapter_id: &AdapterId, op: &Operation, message: impl Into<String>) -> Self {
        Self::Execution {
            adapter_id: adapter_id.to_string(),
            verb: op.verb.to_string(),
            target: op.target.clone(),
            message: message.into(),
        }
    }

    pub fn two_phase_unsupported(adapter_id: &AdapterId) -> Self {
        Self::TwoPhaseUnsupported {
            adapter_id: adapter_id.to_string(),
        }
    }

    pub fn unknown_transaction(adapter_id: &AdapterId, tx_id: Uuid) -> Self {
        Self::UnknownTransaction {
            adapter_id: adapter_id.to_string(),
            tx_id,
        }
    }

    pub fn invalid_operation(
        adapter_id: &AdapterId,
        op: &Operation,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidOperation {
            adapter_id: adapter_id.to_string(),
            verb: op.verb.to_string(),
            target: op.target.clone(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Validate a SQL identifier (table or column name) before it is spliced
/// into a statement. Bind parameters cannot carry identifiers, so the
/// relational adapter builds statements from validated names only.
pub(crate) fn validate_identifier(identifier: &str) -> AdapterResult<&str> {
    let valid = !identifier.is_empty()
        && identifier.len() <= 63
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !identifier.chars().next().unwrap_or('0').is_ascii_digit();

    if valid {
        Ok(identifier)
    } else {
        Err(AdapterError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason: "identifiers must be ASCII alphanumeric/underscore and not start with a digit"
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_round_trip() {
        assert_eq!(BackendKind::Relational.to_string(), "relational");
        assert_eq!(
            "document".parse::<BackendKind>().unwrap(),
            BackendKind::Document
        );
        assert!("graph".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("orders").is_ok());
        assert!(validate_identifier("order_items_2024").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1orders").is_err());
        assert!(validate_identifier("orders; DROP TABLE x").is_err());
    }

    #[test]
    fn test_adapter_id_display() {
        let id = AdapterId::new("primary-db");
        assert_eq!(id.to_string(), "primary-db");
        assert_eq!(id.as_str(), "primary-db");
    }
}
