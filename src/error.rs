//! Crate-level error aggregation.

use crate::adapter::AdapterError;
use crate::engine::errors::EngineError;
use crate::persister::PersistError;
use crate::transaction::TransactionError;
use thiserror::Error;

/// Top-level error type for the coordination core.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias for crate-level operations.
pub type Result<T> = std::result::Result<T, CoreError>;
