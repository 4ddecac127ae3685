//! Store abstractions shared by the resolver, the metrics scheduler and the
//! task worker.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use unfurl_core::models::{MediaRecord, MetricsPollState, NewTask, Task};

/// Cache of resolved media records keyed by identity.
///
/// `put` owns every field except `metrics` once a record exists; `update_metrics` owns exactly one
/// entry of `metrics`. Neither writer clobbers the other's fields.
#[async_trait]
pub trait MediaCache: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<MediaRecord>>;

    /// Insert or replace the record. A replaced record keeps its stored metrics.
    async fn put(&self, record: &MediaRecord) -> Result<()>;

    /// Set `metrics[provider]` on an existing record. Returns false when no
    /// record exists for `identity`.
    async fn update_metrics(&self, identity: &str, provider: &str, value: &Value) -> Result<bool>;
}

/// Durable queue of deferred work.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: NewTask) -> Result<Task>;

    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>>;

    /// Atomically claim the oldest due task and mark it running.
    async fn claim_next_task(&self) -> Result<Option<Task>>;

    async fn mark_completed(&self, task_id: Uuid, result: Value) -> Result<Task>;

    async fn mark_failed(&self, task_id: Uuid, error: Value) -> Result<Task>;

    /// Increment the retry count and make the task due again at `run_at`.
    async fn retry_at(&self, task_id: Uuid, run_at: DateTime<Utc>) -> Result<Task>;

    /// Return running tasks whose timeout (plus grace) elapsed to the queue.
    async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64>;
}

/// Polling state per (identity, provider) pair.
#[async_trait]
pub trait PollStateStore: Send + Sync {
    async fn get(&self, identity: &str, provider: &str) -> Result<Option<MetricsPollState>>;

    /// Insert the state unless one already exists. Returns true if inserted.
    async fn insert_if_absent(&self, state: &MetricsPollState) -> Result<bool>;

    /// Insert or replace the state.
    async fn save(&self, state: &MetricsPollState) -> Result<()>;
}
