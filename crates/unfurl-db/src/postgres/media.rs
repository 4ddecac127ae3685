use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};

use unfurl_core::models::MediaRecord;

use crate::traits::MediaCache;

/// Media cache stored as one JSONB document per identity, with metrics in a
/// separate column so `put` and `update_metrics` never overwrite each other.
#[derive(Clone)]
pub struct PgMediaCache {
    pool: PgPool,
}

impl PgMediaCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MediaCache for PgMediaCache {
    #[tracing::instrument(skip(self))]
    async fn get(&self, identity: &str) -> Result<Option<MediaRecord>> {
        let row = sqlx::query(
            r#"
            SELECT record, metrics
            FROM media_records
            WHERE identity = $1
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch media record")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut record: MediaRecord = serde_json::from_value(row.get::<Value, _>("record"))
            .context("Failed to decode stored media record")?;
        record.metrics = serde_json::from_value(row.get::<Value, _>("metrics"))
            .context("Failed to decode stored metrics")?;
        Ok(Some(record))
    }

    #[tracing::instrument(skip(self, record), fields(identity = %record.identity))]
    async fn put(&self, record: &MediaRecord) -> Result<()> {
        let metrics = serde_json::to_value(&record.metrics).context("Failed to encode metrics")?;
        let mut document = record.clone();
        document.metrics.clear();
        let document = serde_json::to_value(&document).context("Failed to encode media record")?;

        sqlx::query(
            r#"
            INSERT INTO media_records (identity, canonical_url, record, metrics, resolved_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (identity) DO UPDATE
            SET canonical_url = EXCLUDED.canonical_url,
                record = EXCLUDED.record,
                resolved_at = EXCLUDED.resolved_at,
                updated_at = NOW()
            "#,
        )
        .bind(&record.identity)
        .bind(&record.canonical_url)
        .bind(document)
        .bind(metrics)
        .bind(record.resolved_at)
        .execute(&self.pool)
        .await
        .context("Failed to store media record")?;

        tracing::debug!("Media record stored");
        Ok(())
    }

    #[tracing::instrument(skip(self, value))]
    async fn update_metrics(&self, identity: &str, provider: &str, value: &Value) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE media_records
            SET metrics = jsonb_set(metrics, ARRAY[$2], $3, true),
                updated_at = NOW()
            WHERE identity = $1
            "#,
        )
        .bind(identity)
        .bind(provider)
        .bind(value)
        .execute(&self.pool)
        .await
        .context("Failed to update media metrics")?;

        Ok(result.rows_affected() > 0)
    }
}
