//! # Transaction Error Types
//!
//! Structured error handling for the coordination layer using thiserror.
//! The taxonomy mirrors the recovery contract:
//!
//! - `PrepareFailed` is locally recoverable: the coordinator has already
//!   aborted every participant and state is unchanged.
//! - `CommitIndeterminate` is NOT locally recoverable: a reconciliation
//!   record has been queued and the outcome stays unknown until resolved.
//! - `AbortIncomplete` means a compensating operation failed to replay;
//!   cleanup for that transaction is unfinished and needs manual attention.
//! - `InvalidTransactionState` is a programming error and is never caught
//!   and hidden by the coordination layer.

use crate::adapter::AdapterError;
use crate::transaction::phase::TransactionPhase;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the transaction coordinator and unit of work.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Participant {adapter_id} is already registered for transaction {tx_id}")]
    DuplicateParticipant { tx_id: Uuid, adapter_id: String },

    #[error("No participant {adapter_id} registered for transaction {tx_id}")]
    UnknownParticipant { tx_id: Uuid, adapter_id: String },

    #[error("No {kind} participant registered for transaction {tx_id}")]
    BackendUnavailable { tx_id: Uuid, kind: String },

    #[error("Prepare failed for transaction {tx_id}: participant {participant} voted no or timed out")]
    PrepareFailed { tx_id: Uuid, participant: String },

    #[error("Commit indeterminate for transaction {tx_id}: participant {participant} did not acknowledge")]
    CommitIndeterminate { tx_id: Uuid, participant: String },

    #[error("Abort incomplete for transaction {tx_id}: compensation replay failed on {participant}: {reason}")]
    AbortIncomplete {
        tx_id: Uuid,
        participant: String,
        reason: String,
    },

    #[error("Invalid transaction state for {tx_id}: {operation} requires {required}, found {actual}")]
    InvalidTransactionState {
        tx_id: Uuid,
        operation: String,
        required: TransactionPhase,
        actual: TransactionPhase,
    },

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

impl TransactionError {
    pub fn duplicate_participant(tx_id: Uuid, adapter_id: impl Into<String>) -> Self {
        Self::DuplicateParticipant {
            tx_id,
            adapter_id: adapter_id.into(),
        }
    }

    pub fn unknown_participant(tx_id: Uuid, adapter_id: impl Into<String>) -> Self {
        Self::UnknownParticipant {
            tx_id,
            adapter_id: adapter_id.into(),
        }
    }

    pub fn prepare_failed(tx_id: Uuid, participant: impl Into<String>) -> Self {
        Self::PrepareFailed {
            tx_id,
            participant: participant.into(),
        }
    }

    pub fn commit_indeterminate(tx_id: Uuid, participant: impl Into<String>) -> Self {
        Self::CommitIndeterminate {
            tx_id,
            participant: participant.into(),
        }
    }

    pub fn abort_incomplete(
        tx_id: Uuid,
        participant: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::AbortIncomplete {
            tx_id,
            participant: participant.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_state(
        tx_id: Uuid,
        operation: impl Into<String>,
        required: TransactionPhase,
        actual: TransactionPhase,
    ) -> Self {
        Self::InvalidTransactionState {
            tx_id,
            operation: operation.into(),
            required,
            actual,
        }
    }

    /// Whether the caller can recover by retrying at the workflow level.
    ///
    /// Indeterminate and incomplete-abort outcomes require reconciliation,
    /// not a retry; an invalid-state error is a bug in the caller.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(self, Self::PrepareFailed { .. })
    }
}

/// Result type alias for coordination operations.
pub type TransactionResult<T> = Result<T, TransactionError>;
