use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use unfurl_core::models::{NewTask, Task};

use crate::traits::TaskStore;

/// Channel notified with the task id whenever a task is created.
pub const TASK_NOTIFY_CHANNEL: &str = "unfurl_new_task";

const TASK_COLUMNS: &str = r#"
    id,
    task_type,
    status,
    payload,
    result,
    scheduled_at,
    started_at,
    completed_at,
    retry_count,
    max_retries,
    timeout_seconds,
    created_at,
    updated_at
"#;

struct TaskRow(Task);

impl sqlx::FromRow<'_, PgRow> for TaskRow {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(TaskRow(Task {
            id: row.get("id"),
            task_type: row.get::<String, _>("task_type").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task_type: {}", e).into())
            })?,
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task status: {}", e).into())
            })?,
            payload: row.get("payload"),
            result: row.get("result"),
            scheduled_at: row.get("scheduled_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            timeout_seconds: row.get("timeout_seconds"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }
}

#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[tracing::instrument(skip(self, new), fields(task_type = %new.task_type))]
    async fn create_task(&self, new: NewTask) -> Result<Task> {
        let status = new.initial_status(Utc::now());
        let sql = format!(
            r#"
            INSERT INTO tasks (id, task_type, status, payload, scheduled_at, max_retries, timeout_seconds)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let TaskRow(task) = sqlx::query_as::<Postgres, TaskRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.task_type.to_string())
            .bind(status.to_string())
            .bind(new.payload)
            .bind(new.scheduled_at)
            .bind(new.max_retries)
            .bind(new.timeout_seconds)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to insert task into database");
                anyhow::anyhow!("Failed to insert task into database: {}", e)
            })?;

        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(TASK_NOTIFY_CHANNEL)
            .bind(task.id.to_string())
            .execute(&self.pool)
            .await
        {
            tracing::warn!(error = %e, task_id = %task.id, "Failed to notify workers of new task");
        }

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            scheduled_at = %task.scheduled_at,
            "Task created"
        );

        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE id = $1", TASK_COLUMNS);
        let task = sqlx::query_as::<Postgres, TaskRow>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch task")?;
        Ok(task.map(|t| t.0))
    }

    #[tracing::instrument(skip(self))]
    async fn claim_next_task(&self) -> Result<Option<Task>> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'running',
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id
                FROM tasks
                WHERE status IN ('pending', 'scheduled')
                    AND scheduled_at <= NOW()
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let task = sqlx::query_as::<Postgres, TaskRow>(&sql)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to claim next task")?
            .map(|t| t.0);

        if let Some(task) = &task {
            tracing::debug!(task_id = %task.id, task_type = %task.task_type, "Task claimed");
        }

        Ok(task)
    }

    #[tracing::instrument(skip(self, result))]
    async fn mark_completed(&self, task_id: Uuid, result: Value) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'completed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let TaskRow(task) = sqlx::query_as::<Postgres, TaskRow>(&sql)
            .bind(task_id)
            .bind(result)
            .fetch_one(&self.pool)
            .await
            .context("Failed to mark task as completed")?;

        tracing::info!(task_id = %task_id, task_type = %task.task_type, "Task completed");
        Ok(task)
    }

    #[tracing::instrument(skip(self, error))]
    async fn mark_failed(&self, task_id: Uuid, error: Value) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'failed',
                result = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let TaskRow(task) = sqlx::query_as::<Postgres, TaskRow>(&sql)
            .bind(task_id)
            .bind(error)
            .fetch_one(&self.pool)
            .await
            .context("Failed to mark task as failed")?;

        tracing::error!(
            task_id = %task_id,
            task_type = %task.task_type,
            retry_count = task.retry_count,
            "Task failed"
        );
        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn retry_at(&self, task_id: Uuid, run_at: DateTime<Utc>) -> Result<Task> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'scheduled',
                retry_count = retry_count + 1,
                scheduled_at = $2,
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let TaskRow(task) = sqlx::query_as::<Postgres, TaskRow>(&sql)
            .bind(task_id)
            .bind(run_at)
            .fetch_one(&self.pool)
            .await
            .context("Failed to reschedule task")?;

        tracing::info!(
            task_id = %task_id,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            run_at = %run_at,
            "Task retry scheduled"
        );
        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending',
                started_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
                AND started_at IS NOT NULL
                AND started_at
                    + make_interval(secs => COALESCE(timeout_seconds, 0) + $1)
                    < NOW()
            "#,
        )
        .bind(grace_period_secs as f64)
        .execute(&self.pool)
        .await
        .context("Failed to reap stale running tasks")?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count, "Requeued stale running tasks");
        }
        Ok(count)
    }
}
