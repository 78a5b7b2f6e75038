use async_trait::async_trait;
use tracing::debug;

use leavewatch_core::analytics::{AnalyticsEvent, AnalyticsSink};
use leavewatch_core::errors::StoreError;

use crate::{DbPool, RepositoryError};

pub struct SqlAnalyticsSink {
    pool: DbPool,
}

impl SqlAnalyticsSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalyticsSink for SqlAnalyticsSink {
    /// Writes the whole batch in one transaction. Replayed event ids are ignored.
    async fn write_batch(&self, events: &[AnalyticsEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        for event in events {
            let metadata = serde_json::to_string(&event.metadata)
                .map_err(|err| RepositoryError::Decode(err.to_string()))?;
            sqlx::query(
                "INSERT INTO analytics_events
                     (event_id, category, event_type, correlation_id, person_id, metadata_json, occurred_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(event_id) DO NOTHING",
            )
            .bind(&event.event_id)
            .bind(event.category.as_str())
            .bind(&event.event_type)
            .bind(&event.correlation_id)
            .bind(&event.person_id)
            .bind(metadata)
            .bind(event.occurred_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        }
        tx.commit().await.map_err(RepositoryError::from)?;

        debug!(event_name = "db.analytics.batch_written", count = events.len(), "analytics batch stored");
        Ok(())
    }
}
