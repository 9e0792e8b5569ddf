//! Document adapter: collections of JSON documents stored in Postgres.
//!
//! Documents live in a single `lattice_documents` table keyed by
//! `(collection, doc_id)`. Like the relational adapter, writes execute
//! inside one held backend transaction and stay provisional until commit.

use crate::adapter::{
    Adapter, AdapterError, AdapterId, AdapterResult, BackendKind, ExecutionOutcome,
};
use crate::transaction::operation::{Operation, OperationVerb};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

/// DDL for the document collection table.
pub const DOCUMENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lattice_documents (
    collection  TEXT        NOT NULL,
    doc_id      TEXT        NOT NULL,
    body        JSONB       NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (collection, doc_id)
)
"#;

/// Two-phase adapter for the document store.
pub struct DocumentAdapter {
    id: AdapterId,
    pool: PgPool,
    current: Mutex<Option<(Uuid, Transaction<'static, Postgres>)>>,
}

impl DocumentAdapter {
    pub fn new(id: impl Into<AdapterId>, pool: PgPool) -> Self {
        Self {
            id: id.into(),
            pool,
            current: Mutex::new(None),
        }
    }

    /// Create the backing table if it does not exist.
    pub async fn ensure_schema(pool: &PgPool) -> AdapterResult<()> {
        sqlx::query(DOCUMENT_SCHEMA)
            .execute(pool)
            .await
            .map_err(|e| AdapterError::Connection {
                adapter_id: "document".to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn doc_id<'a>(&self, op: &'a Operation) -> AdapterResult<&'a str> {
        op.payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AdapterError::invalid_operation(&self.id, op, "document payload requires an 'id'")
            })
    }
}

#[async_trait]
impl Adapter for DocumentAdapter {
    fn id(&self) -> &AdapterId {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Document
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
        let mut guard = self.current.lock().await;
        if guard.is_none() {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| AdapterError::connection(&self.id, e.to_string()))?;
            *guard = Some((Uuid::nil(), tx));
        }
        let tx = &mut guard.as_mut().unwrap().1;

        let result = match op.verb {
            // Upsert: insert wins for new ids, replaces body otherwise.
            OperationVerb::Insert | OperationVerb::Update => {
                let doc_id = self.doc_id(op)?;
                let body = op.payload.get("body").unwrap_or(&op.payload);
                sqlx::query(
                    "INSERT INTO lattice_documents (collection, doc_id, body, updated_at) \
                     VALUES ($1, $2, $3, now()) \
                     ON CONFLICT (collection, doc_id) \
                     DO UPDATE SET body = EXCLUDED.body, updated_at = now()",
                )
                .bind(&op.target)
                .bind(doc_id)
                .bind(body)
                .execute(&mut **tx)
                .await
            }
            OperationVerb::Delete => {
                let doc_id = self.doc_id(op)?;
                sqlx::query("DELETE FROM lattice_documents WHERE collection = $1 AND doc_id = $2")
                    .bind(&op.target)
                    .bind(doc_id)
                    .execute(&mut **tx)
                    .await
            }
            other => {
                return Err(AdapterError::invalid_operation(
                    &self.id,
                    op,
                    format!("verb {other} is not a document operation"),
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
                sqlx::query("SELECT 1")
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| AdapterError::connection(&self.id, e.to_string()))?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn commit(&self, _tx_id: Uuid) -> AdapterResult<()> {
        let mut guard = self.current.lock().await;
        match guard.take() {
            Some((_, tx)) => tx
                .commit()
                .await
                .map_err(|e| AdapterError::connection(&self.id, e.to_string())),
            None => Ok(()),
        }
    }

    async fn rollback(&self, _tx_id: Uuid) -> AdapterResult<()> {
        let mut guard = self.current.lock().await;
        match guard.take() {
            Some((_, tx)) => tx
                .rollback()
                .await
                .map_err(|e| AdapterError::connection(&self.id, e.to_string())),
            None => Ok(()),
        }
    }
}
