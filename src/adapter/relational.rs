//! Relational adapter backed by a Postgres pool.
//!
//! Writes execute inside one held `sqlx::Transaction`, so every effect is
//! provisional until the coordinator drives commit; rollback drops the
//! backend transaction without a trace. `prepare` validates the held
//! transaction is still live, which is this backend's vote.
//!
//! Row payloads are JSON objects keyed by column name. Inserts go through
//! `jsonb_populate_record`, so one bind parameter covers arbitrary tables;
//! identifiers are validated before they are spliced into a statement.

use crate::adapter::{
    validate_identifier, Adapter, AdapterError, AdapterId, AdapterResult, BackendKind,
    ExecutionOutcome,
};
use crate::transaction::operation::{Operation, OperationVerb};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Two-phase adapter for the relational store.
pub struct RelationalAdapter {
    id: AdapterId,
    pool: PgPool,
    /// The backend transaction held open for the current coordinator
    /// transaction. One adapter instance serves one transaction at a time;
    /// the pool checkout discipline enforces that.
    current: Mutex<Option<(Uuid, Transaction<'static, Postgres>)>>,
}

impl RelationalAdapter {
    pub fn new(id: impl Into<AdapterId>, pool: PgPool) -> Self {
        Self {
            id: id.into(),
            pool,
            current: Mutex::new(None),
        }
    }

    async fn tx_for<'a>(
        &self,
        guard: &'a mut Option<(Uuid, Transaction<'static, Postgres>)>,
    ) -> AdapterResult<&'a mut Transaction<'static, Postgres>> {
        if guard.is_none() {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| AdapterError::connection(&self.id, e.to_string()))?;
            *guard = Some((Uuid::nil(), tx));
        }
        Ok(&mut guard.as_mut().unwrap().1)
    }
}

#[async_trait]
impl Adapter for RelationalAdapter {
    fn id(&self) -> &AdapterId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn supports_two_phase(&self) -> bool {
        true
    }

    async fn connect(&self) -> AdapterResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AdapterError::connection(&self.id, e.to_string()))?;
        Ok(())
    }

    async fn execute(&self, op: &Operation) -> AdapterResult<ExecutionOutcome> {
        let table = validate_identifier(&op.target)?.to_string();
        let mut guard = self.current.lock().await;
        let tx = self.tx_for(&mut guard).await?;

        let result = match op.verb {
            OperationVerb::Insert => {
                let sql = format!(
                    "INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, $1)"
                );
                sqlx::query(&sql).bind(&op.payload).execute(&mut **tx).await
            }
            OperationVerb::Update => {
                // Payload shape: { "key": <id>, "set": { col: value, ... } }
                let set = op.payload.get("set").and_then(|v| v.as_object()).ok_or_else(
                    || AdapterError::invalid_operation(&self.id, op, "update payload requires a 'set' object"),
                )?;
                let key = op.payload.get("key").ok_or_else(|| {
                    AdapterError::invalid_operation(&self.id, op, "update payload requires a 'key'")
                })?;

                let mut columns = Vec::with_capacity(set.len());
                for column in set.keys() {
                    columns.push(validate_identifier(column)?.to_string());
                }
                let column_list = columns.join(", ");
                let sql = if columns.len() == 1 {
                    format!(
                        "UPDATE {table} SET {column_list} = \
                         (SELECT {column_list} FROM jsonb_populate_record(NULL::{table}, $1)) \
                         WHERE id::text = $2"
                    )
                } else {
                    format!(
                        "UPDATE {table} SET ({column_list}) = \
                         (SELECT {column_list} FROM jsonb_populate_record(NULL::{table}, $1)) \
                         WHERE id::text = $2"
                    )
                };
                sqlx::query(&sql)
                    .bind(serde_json::Value::Object(set.clone()))
                    .bind(json_key_text(key))
                    .execute(&mut **tx)
                    .await
            }
            OperationVerb::Delete => {
                let key = op.payload.get("key").unwrap_or(&op.payload);
                let sql = format!("DELETE FROM {table} WHERE id::text = $1");
                sqlx::query(&sql)
                    .bind(json_key_text(key))
                    .execute(&mut **tx)
                    .await
            }
            other => {
                return Err(AdapterError::invalid_operation(
                    &self.id,
                    op,
                    format!("verb {other} is not a relational operation"),
                ))
            }
        };

        let done = result.map_err(|e| AdapterError::execution(&self.id, op, e.to_string()))?;
        Ok(ExecutionOutcome::affected(done.rows_affected()))
    }

    async fn prepare(&self, tx_id: Uuid) -> AdapterResult<()> {
        let mut guard = self.current.lock().await;
        match guard.as_mut() {
            Some((held, tx)) => {
                *held = tx_id;
                // The vote: the held backend transaction must still be live.
                sqlx::query("SELECT 1")
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| AdapterError::transaction_failure(&self.id, tx_id, e.to_string()))?;
                debug!(adapter = %self.id, tx_id = %tx_id, "Relational prepare vote: yes");
                Ok(())
            }
            // No writes were issued; an empty transaction can always commit.
            None => Ok(()),
        }
    }

    async fn commit(&self, tx_id: Uuid) -> AdapterResult<()> {
        let mut guard = self.current.lock().await;
        match guard.take() {
            Some((_, tx)) => tx
                .commit()
                .await
                .map_err(|e| AdapterError::transaction_failure(&self.id, tx_id, e.to_string())),
            // Nothing held: already committed (retry path) or no writes.
            None => Ok(()),
        }
    }

    async fn rollback(&self, tx_id: Uuid) -> AdapterResult<()> {
        let mut guard = self.current.lock().await;
        match guard.take() {
            Some((_, tx)) => tx
                .rollback()
                .await
                .map_err(|e| AdapterError::transaction_failure(&self.id, tx_id, e.to_string())),
            None => Ok(()),
        }
    }
}

/// Bind a JSON key as text so `id::text = $n` matches uuid, integer, and
/// text primary keys alike.
fn json_key_text(key: &serde_json::Value) -> String {
    match key {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl AdapterError {
    fn transaction_failure(adapter_id: &AdapterId, tx_id: Uuid, message: String) -> Self {
        Self::Connection {
            adapter_id: adapter_id.to_string(),
            message: format!("transaction {tx_id}: {message}"),
        }
    }
}
