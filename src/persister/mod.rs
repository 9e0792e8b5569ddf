//! # State Persistence
//!
//! Durable storage for immutable [`State`](crate::engine::State) snapshots,
//! keyed by `(subject_id, partition, sequence_id)`. Saves enforce optimistic
//! concurrency: a snapshot with sequence `n` is accepted only if the latest
//! saved sequence for that subject/partition is exactly `n - 1`, otherwise
//! the save fails with a conflict and the caller must reload and recompute.
//!
//! Partitions are fully independent lifecycle buckets: saving to `draft`
//! never affects `published` until an explicit promotion action copies state
//! across partitions. History is retained; snapshots are superseded, never
//! deleted.

pub mod memory;
pub mod postgres;

use crate::engine::state::{Partition, State};
use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryStatePersister;
pub use postgres::PostgresStatePersister;

/// Persistence errors.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Conflict saving {subject_id}/{partition}: expected prior sequence {expected_prior}, latest is {latest}")]
    Conflict {
        subject_id: String,
        partition: String,
        expected_prior: i64,
        latest: i64,
    },

    #[error("No state found for {subject_id}/{partition}")]
    NotFound {
        subject_id: String,
        partition: String,
    },

    #[error("No state found for {subject_id}/{partition} at sequence {sequence_id}")]
    VersionNotFound {
        subject_id: String,
        partition: String,
        sequence_id: i64,
    },

    #[error("Database error: {message}")]
    Database { message: String },
}

impl PersistError {
    pub fn conflict(state: &State, latest: i64) -> Self {
        Self::Conflict {
            subject_id: state.subject_id.clone(),
            partition: state.partition.to_string(),
            expected_prior: state.sequence_id - 1,
            latest,
        }
    }

    pub fn not_found(subject_id: &str, partition: &Partition) -> Self {
        Self::NotFound {
            subject_id: subject_id.to_string(),
            partition: partition.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<sqlx::Error> for PersistError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

/// Result type alias for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable store for state snapshots.
#[async_trait]
pub trait StatePersister: Send + Sync {
    /// Save a snapshot. The expected prior sequence is implied by the
    /// snapshot itself (`state.sequence_id - 1`; an initial snapshot expects
    /// no prior history). If another writer advanced the sequence first, the
    /// save fails with [`PersistError::Conflict`] and nothing is written.
    async fn save(&self, state: &State) -> PersistResult<()>;

    /// Latest snapshot for the subject/partition.
    async fn load(&self, subject_id: &str, partition: &Partition) -> PersistResult<State>;

    /// Exact historical snapshot.
    async fn load_version(
        &self,
        subject_id: &str,
        partition: &Partition,
        sequence_id: i64,
    ) -> PersistResult<State>;
}
