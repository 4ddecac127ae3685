use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};

use unfurl_core::models::MetricsPollState;

use crate::traits::PollStateStore;

const POLL_STATE_COLUMNS: &str = "identity, provider, url, external_id, credential_id, \
     attempt_count, next_run_at, last_value, phase, created_at, updated_at";

struct PollStateRow(MetricsPollState);

impl sqlx::FromRow<'_, PgRow> for PollStateRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(PollStateRow(MetricsPollState {
            identity: row.get("identity"),
            provider: row.get("provider"),
            url: row.get("url"),
            external_id: row.get("external_id"),
            credential_id: row.get("credential_id"),
            attempt_count: row.get("attempt_count"),
            next_run_at: row.get("next_run_at"),
            last_value: row.get("last_value"),
            phase: row.get::<String, _>("phase").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse poll phase: {}", e).into())
            })?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }
}

#[derive(Clone)]
pub struct PgPollStateStore {
    pool: PgPool,
}

impl PgPollStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PollStateStore for PgPollStateStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, identity: &str, provider: &str) -> Result<Option<MetricsPollState>> {
        let sql = format!(
            "SELECT {} FROM metrics_poll_states WHERE identity = $1 AND provider = $2",
            POLL_STATE_COLUMNS
        );
        let row = sqlx::query_as::<Postgres, PollStateRow>(&sql)
            .bind(identity)
            .bind(provider)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch metrics poll state")?;
        Ok(row.map(|r| r.0))
    }

    #[tracing::instrument(skip(self, state), fields(identity = %state.identity, provider = %state.provider))]
    async fn insert_if_absent(&self, state: &MetricsPollState) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO metrics_poll_states (
                identity, provider, url, external_id, credential_id,
                attempt_count, next_run_at, last_value, phase, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (identity, provider) DO NOTHING
            "#,
        )
        .bind(&state.identity)
        .bind(&state.provider)
        .bind(&state.url)
        .bind(&state.external_id)
        .bind(&state.credential_id)
        .bind(state.attempt_count)
        .bind(state.next_run_at)
        .bind(&state.last_value)
        .bind(state.phase.to_string())
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert metrics poll state")?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, state), fields(identity = %state.identity, provider = %state.provider))]
    async fn save(&self, state: &MetricsPollState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics_poll_states (
                identity, provider, url, external_id, credential_id,
                attempt_count, next_run_at, last_value, phase, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (identity, provider) DO UPDATE
            SET url = EXCLUDED.url,
                external_id = EXCLUDED.external_id,
                credential_id = EXCLUDED.credential_id,
                attempt_count = EXCLUDED.attempt_count,
                next_run_at = EXCLUDED.next_run_at,
                last_value = EXCLUDED.last_value,
                phase = EXCLUDED.phase,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&state.identity)
        .bind(&state.provider)
        .bind(&state.url)
        .bind(&state.external_id)
        .bind(&state.credential_id)
        .bind(state.attempt_count)
        .bind(state.next_run_at)
        .bind(&state.last_value)
        .bind(state.phase.to_string())
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to save metrics poll state")?;

        tracing::debug!(phase = %state.phase, attempt_count = state.attempt_count, "Poll state saved");
        Ok(())
    }
}
