//! Postgres-backed persister.
//!
//! One row per snapshot; the primary key on
//! `(subject_id, partition, sequence_id)` makes duplicate sequences
//! impossible, and the guarded insert makes the expected-prior-sequence
//! check atomic with the write.

use crate::engine::state::{Partition, State};
use crate::persister::{PersistError, PersistResult, StatePersister};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

/// DDL for the snapshot table.
pub const STATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lattice_states (
    subject_id   TEXT        NOT NULL,
    partition    TEXT        NOT NULL,
    sequence_id  BIGINT      NOT NULL,
    payload      JSONB       NOT NULL,
    saved_at     TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (subject_id, partition, sequence_id)
)
"#;

/// Durable snapshot store over Postgres.
pub struct PostgresStatePersister {
    pool: PgPool,
}

impl PostgresStatePersister {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist.
    pub async fn ensure_schema(&self) -> PersistResult<()> {
        sqlx::query(STATE_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_state(row: &PgRow) -> State {
        let partition: String = row.get("partition");
        State {
            subject_id: row.get("subject_id"),
            partition: Partition::from(partition.as_str()),
            sequence_id: row.get("sequence_id"),
            payload: row.get("payload"),
            saved_at: row.get("saved_at"),
        }
    }
}

#[async_trait]
impl StatePersister for PostgresStatePersister {
    async fn save(&self, state: &State) -> PersistResult<()> {
        // The insert only fires when the latest stored sequence equals the
        // snapshot's expected prior; zero rows affected means a concurrent
        // writer advanced it first.
        let result = sqlx::query(
            r#"
            INSERT INTO lattice_states (subject_id, partition, sequence_id, payload, saved_at)
            SELECT $1, $2, $3, $4, $5
            WHERE COALESCE(
                (SELECT MAX(sequence_id) FROM lattice_states
                 WHERE subject_id = $1 AND partition = $2),
                0
            ) = $3 - 1
            "#,
        )
        .bind(&state.subject_id)
        .bind(state.partition.to_string())
        .bind(state.sequence_id)
        .bind(&state.payload)
        .bind(state.saved_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                debug!(
                    subject_id = %state.subject_id,
                    partition = %state.partition,
                    sequence_id = state.sequence_id,
                    "State snapshot saved"
                );
                Ok(())
            }
            Ok(_) => {
                let latest = self
                    .load(&state.subject_id, &state.partition)
                    .await
                    .map(|s| s.sequence_id)
                    .unwrap_or(0);
                Err(PersistError::conflict(state, latest))
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                // Two writers raced the guarded insert; the second hits the
                // primary key instead of the guard.
                Err(PersistError::conflict(state, state.sequence_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, subject_id: &str, partition: &Partition) -> PersistResult<State> {
        let row = sqlx::query(
            r#"
            SELECT subject_id, partition, sequence_id, payload, saved_at
            FROM lattice_states
            WHERE subject_id = $1 AND partition = $2
            ORDER BY sequence_id DESC
            LIMIT 1
            "#,
        )
        .bind(subject_id)
        .bind(partition.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(Self::row_to_state)
            .ok_or_else(|| PersistError::not_found(subject_id, partition))
    }

    async fn load_version(
        &self,
        subject_id: &str,
        partition: &Partition,
        sequence_id: i64,
    ) -> PersistResult<State> {
        let row = sqlx::query(
            r#"
            SELECT subject_id, partition, sequence_id, payload, saved_at
            FROM lattice_states
            WHERE subject_id = $1 AND partition = $2 AND sequence_id = $3
            "#,
        )
        .bind(subject_id)
        .bind(partition.to_string())
        .bind(sequence_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(Self::row_to_state)
            .ok_or(PersistError::VersionNotFound {
                subject_id: subject_id.to_string(),
                partition: partition.to_string(),
                sequence_id,
            })
    }
}
