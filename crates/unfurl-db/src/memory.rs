//! In-memory stores for local runs and tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use unfurl_core::models::{MediaRecord, MetricsPollState, NewTask, Task, TaskStatus};

use crate::traits::{MediaCache, PollStateStore, TaskStore};

#[derive(Clone, Default)]
pub struct InMemoryMediaCache {
    records: Arc<RwLock<HashMap<String, MediaRecord>>>,
}

impl InMemoryMediaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MediaCache for InMemoryMediaCache {
    async fn get(&self, identity: &str) -> Result<Option<MediaRecord>> {
        Ok(self.records.read().await.get(identity).cloned())
    }

    async fn put(&self, record: &MediaRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let mut stored = record.clone();
        if let Some(existing) = records.get(&record.identity) {
            stored.metrics = existing.metrics.clone();
        }
        records.insert(record.identity.clone(), stored);
        Ok(())
    }

    async fn update_metrics(&self, identity: &str, provider: &str, value: &Value) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(identity) {
            Some(record) => {
                record.metrics.insert(provider.to_string(), value.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every task, oldest schedule first.
    pub async fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| (t.scheduled_at, t.created_at));
        tasks
    }

    async fn update<F>(&self, task_id: Uuid, apply: F) -> Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&task_id)
            .ok_or_else(|| anyhow!("Task not found: {}", task_id))?;
        apply(task);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, new: NewTask) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            task_type: new.task_type,
            status: new.initial_status(now),
            payload: new.payload,
            result: None,
            scheduled_at: new.scheduled_at,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: new.max_retries,
            timeout_seconds: new.timeout_seconds,
            created_at: now,
            updated_at: now,
        };
        self.tasks.write().await.insert(task.id, task.clone());
        tracing::debug!(task_id = %task.id, task_type = %task.task_type, "Task created");
        Ok(task)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(&task_id).cloned())
    }

    async fn claim_next_task(&self) -> Result<Option<Task>> {
        let now = Utc::now();
        let mut tasks = self.tasks.write().await;
        let next = tasks
            .values()
            .filter(|t| t.is_ready_to_run(now))
            .min_by_key(|t| (t.scheduled_at, t.created_at))
            .map(|t| t.id);

        Ok(next.and_then(|id| {
            tasks.get_mut(&id).map(|task| {
                task.status = TaskStatus::Running;
                task.started_at = Some(now);
                task.updated_at = now;
                task.clone()
            })
        }))
    }

    async fn mark_completed(&self, task_id: Uuid, result: Value) -> Result<Task> {
        self.update(task_id, |task| {
            task.status = TaskStatus::Completed;
            task.result = Some(result);
            task.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(&self, task_id: Uuid, error: Value) -> Result<Task> {
        self.update(task_id, |task| {
            task.status = TaskStatus::Failed;
            task.result = Some(error);
            task.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn retry_at(&self, task_id: Uuid, run_at: DateTime<Utc>) -> Result<Task> {
        self.update(task_id, |task| {
            task.status = TaskStatus::Scheduled;
            task.retry_count += 1;
            task.started_at = None;
            task.scheduled_at = run_at;
        })
        .await
    }

    async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<u64> {
        let now = Utc::now();
        let mut reaped = 0;
        for task in self.tasks.write().await.values_mut() {
            if task.status != TaskStatus::Running {
                continue;
            }
            let Some(started_at) = task.started_at else {
                continue;
            };
            let limit = i64::from(task.timeout_seconds.unwrap_or(0)) + grace_period_secs;
            if started_at + Duration::seconds(limit) < now {
                task.status = TaskStatus::Pending;
                task.started_at = None;
                task.updated_at = now;
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryPollStateStore {
    states: Arc<RwLock<HashMap<(String, String), MetricsPollState>>>,
}

impl InMemoryPollStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollStateStore for InMemoryPollStateStore {
    async fn get(&self, identity: &str, provider: &str) -> Result<Option<MetricsPollState>> {
        Ok(self
            .states
            .read()
            .await
            .get(&(identity.to_string(), provider.to_string()))
            .cloned())
    }

    async fn insert_if_absent(&self, state: &MetricsPollState) -> Result<bool> {
        let mut states = self.states.write().await;
        let key = (state.identity.clone(), state.provider.clone());
        if states.contains_key(&key) {
            return Ok(false);
        }
        states.insert(key, state.clone());
        Ok(true)
    }

    async fn save(&self, state: &MetricsPollState) -> Result<()> {
        self.states.write().await.insert(
            (state.identity.clone(), state.provider.clone()),
            state.clone(),
        );
        Ok(())
    }
}
