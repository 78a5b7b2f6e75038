use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;
use tracing::warn;

use leavewatch_core::errors::StoreError;
use leavewatch_core::store::{DocumentPredicate, DocumentStore};

use crate::{DbPool, RepositoryError};

/// Every collection lives in one `documents` table keyed by
/// `(collection, id)`; saves are upserts.
pub struct SqlDocumentStore {
    pool: DbPool,
}

impl SqlDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_body(collection: &str, id: &str, body: &str) -> Result<Value, RepositoryError> {
    serde_json::from_str(body)
        .map_err(|err| RepositoryError::Decode(format!("{collection}/{id}: {err}")))
}

#[async_trait]
impl DocumentStore for SqlDocumentStore {
    async fn save(&self, collection: &str, id: &str, document: Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO documents (collection, id, body, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(collection, id) DO UPDATE SET
                 body = excluded.body,
                 updated_at = excluded.updated_at",
        )
        .bind(collection)
        .bind(id)
        .bind(document.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn load(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        match row {
            Some(row) => {
                let body: String =
                    row.try_get("body").map_err(|e| RepositoryError::Decode(e.to_string()))?;
                Ok(Some(decode_body(collection, id, &body)?))
            }
            None => Ok(None),
        }
    }

    async fn query_all(
        &self,
        collection: &str,
        predicate: DocumentPredicate<'_>,
    ) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::query("SELECT id, body FROM documents WHERE collection = ? ORDER BY id")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String =
                row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let body: String =
                row.try_get("body").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            // One corrupt row must not hide the rest of the collection.
            match decode_body(collection, &id, &body) {
                Ok(document) if predicate(&document) => documents.push(document),
                Ok(_) => {}
                Err(err) => warn!(
                    event_name = "db.document.decode_failed",
                    correlation_id = %id,
                    collection,
                    error = %err,
                    "skipping undecodable document"
                ),
            }
        }
        Ok(documents)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(result.rows_affected() > 0)
    }
}
