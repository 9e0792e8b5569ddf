//! Engine error types.

use crate::persister::PersistError;
use crate::transaction::TransactionError;
use thiserror::Error;

/// Errors raised by actions, the transition table, and the workflow driver.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown action: {name}")]
    UnknownAction { name: String },

    #[error("Invalid transition table: {reason}")]
    InvalidTransitionTable { reason: String },

    #[error("Workflow exceeded {max_steps} steps without reaching an end state")]
    StepLimitExceeded { max_steps: usize },

    #[error("Save conflict persisted after {attempts} reload attempts: {source}")]
    ConflictRetriesExhausted {
        attempts: u32,
        source: PersistError,
    },

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),
}

impl EngineError {
    pub fn unknown_action(name: impl Into<String>) -> Self {
        Self::UnknownAction { name: name.into() }
    }

    pub fn invalid_table(reason: impl Into<String>) -> Self {
        Self::InvalidTransitionTable {
            reason: reason.into(),
        }
    }

    /// True when the underlying transaction landed indeterminate: the
    /// state was not advanced, but backends may have partially committed
    /// and reconciliation is required.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            Self::Transaction(TransactionError::CommitIndeterminate { .. })
        )
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
