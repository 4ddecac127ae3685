//! Task queue: worker pool, LISTEN/NOTIFY or polling, retry, and submission.
//!
//! Shutdown: [`TaskQueue::shutdown`] signals the pool to stop; it does not wait for
//! in-flight tasks.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use unfurl_core::models::{NewTask, Task, TaskPayload};
use unfurl_core::TaskError;
use unfurl_db::{TaskStore, TASK_NOTIFY_CHANNEL};

use crate::context::TaskHandlerContext;

/// Maximum delay in seconds before retrying a failed task.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

/// Exponential backoff for a given retry count, capped.
#[inline]
pub(crate) fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    2_u64
        .checked_pow(retry_count.max(0) as u32)
        .unwrap_or(u64::MAX)
        .min(MAX_RETRY_BACKOFF_SECS)
}

fn retry_time(retry_count: i32) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::seconds(compute_retry_backoff_seconds(retry_count) as i64)
}

#[derive(Clone)]
pub struct TaskQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub default_timeout_seconds: i32,
    pub max_retries: i32,
    /// Interval in seconds between runs of the stale task reaper.
    pub stale_task_reap_interval_secs: u64,
    /// Grace period in seconds added to task timeout before reaping stale running tasks.
    pub stale_task_grace_period_secs: i64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
            default_timeout_seconds: 300,
            max_retries: 3,
            stale_task_reap_interval_secs: 60,
            stale_task_grace_period_secs: 300,
        }
    }
}

impl From<&unfurl_core::Config> for TaskQueueConfig {
    fn from(config: &unfurl_core::Config) -> Self {
        Self {
            max_workers: config.task_queue_max_workers(),
            poll_interval_ms: config.task_queue_poll_interval_ms(),
            default_timeout_seconds: config.task_queue_default_timeout_seconds(),
            max_retries: config.task_queue_max_retries(),
            stale_task_reap_interval_secs: config.task_queue_stale_task_reap_interval_secs(),
            stale_task_grace_period_secs: config.task_queue_stale_task_grace_period_secs(),
        }
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    config: TaskQueueConfig,
    wake: Arc<Notify>,
    shutdown_tx: mpsc::Sender<()>,
}

impl TaskQueue {
    /// Create a queue and spawn its worker pool.
    ///
    /// If `pool` is `Some`, the worker also LISTENs for task creation and wakes
    /// immediately instead of waiting for the next poll.
    pub fn new(
        store: Arc<dyn TaskStore>,
        config: TaskQueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let wake = Arc::new(Notify::new());

        let store_clone = store.clone();
        let config_clone = config.clone();
        let wake_clone = wake.clone();

        tokio::spawn(async move {
            Self::worker_pool(store_clone, config_clone, context, shutdown_rx, wake_clone, pool)
                .await;
        });

        Self {
            store,
            config,
            wake,
            shutdown_tx,
        }
    }

    /// A queue that only submits. Tasks are written to the store and picked
    /// up by whichever worker polls it.
    pub fn new_no_worker(store: Arc<dyn TaskStore>, config: TaskQueueConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        Self {
            store,
            config,
            wake: Arc::new(Notify::new()),
            shutdown_tx,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Submit a new task to the queue.
    #[tracing::instrument(skip(self, task), fields(task_type = %task.task_type))]
    pub async fn submit_task(&self, task: NewTask) -> Result<Uuid> {
        let task_type = task.task_type;
        let task = self.store.create_task(task).await.map_err(|e| {
            tracing::error!(
                error = %e,
                task_type = %task_type,
                "Failed to create task in store"
            );
            anyhow::anyhow!("Failed to create task in store: {}", e)
        })?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task_type,
            scheduled_at = %task.scheduled_at,
            "Task submitted to queue"
        );

        self.wake.notify_one();
        Ok(task.id)
    }

    /// Submit a typed payload due at `scheduled_at`, with the queue's retry
    /// and timeout limits.
    pub async fn submit<P: TaskPayload>(
        &self,
        payload: &P,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        let task = NewTask::from_payload(payload, scheduled_at)
            .context("Failed to serialize task payload")?
            .with_limits(
                self.config.max_retries,
                Some(self.config.default_timeout_seconds),
            );
        self.submit_task(task).await
    }

    /// Process every task that is due now, one at a time, until none is left.
    /// Returns how many tasks were claimed.
    pub async fn run_due(&self, context: Arc<dyn TaskHandlerContext>) -> Result<usize> {
        let weak = Arc::downgrade(&context);
        let mut processed = 0;
        while let Some(task) = self
            .store
            .claim_next_task()
            .await
            .context("Failed to claim task from queue")?
        {
            processed += 1;
            if let Err(e) = Self::process_task_with_retry(task, self.store.clone(), weak.clone()).await
            {
                tracing::error!(error = %e, "Task processing failed");
            }
        }
        Ok(processed)
    }

    async fn worker_pool(
        store: Arc<dyn TaskStore>,
        config: TaskQueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
        wake: Arc<Notify>,
        pool: Option<sqlx::PgPool>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = use_listen,
            "Task queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        if let Some(pool) = pool {
            let wake = wake.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(TASK_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                wake.notify_one();
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        let (reaper_shutdown_tx, mut reaper_shutdown_rx) = mpsc::channel::<()>(1);
        if config.stale_task_reap_interval_secs > 0 {
            let store_for_reaper = store.clone();
            let reap_interval = Duration::from_secs(config.stale_task_reap_interval_secs);
            let grace_period = config.stale_task_grace_period_secs;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match store_for_reaper.reap_stale_running_tasks(grace_period).await {
                                Ok(0) => {}
                                Ok(reaped) => tracing::warn!(reaped, "Returned stale running tasks to the queue"),
                                Err(e) => tracing::error!(error = %e, "Stale task reaper failed"),
                            }
                        }
                        _ = reaper_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Task queue worker pool shutting down");
                    let _ = reaper_shutdown_tx.send(()).await;
                    break;
                }
                _ = wake.notified() => {
                    Self::claim_and_dispatch(&store, &semaphore, &context).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch(&store, &semaphore, &context).await;
                }
            }
        }

        tracing::info!("Task queue worker pool stopped");
    }

    /// Claim due tasks while workers are free.
    async fn claim_and_dispatch(
        store: &Arc<dyn TaskStore>,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn TaskHandlerContext>,
    ) {
        loop {
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::debug!("No workers available, skipping claim");
                    return;
                }
            };

            match store.claim_next_task().await {
                Ok(Some(task)) => {
                    let store = store.clone();
                    let ctx = context.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = Self::process_task_with_retry(task, store, ctx).await {
                            tracing::error!(error = %e, "Task processing failed");
                        }
                    });
                }
                Ok(None) => {
                    tracing::trace!("No tasks available in queue");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim task from queue");
                    return;
                }
            }
        }
    }

    #[tracing::instrument(skip(store, context), fields(task.id = %task.id, task.type = %task.task_type))]
    async fn process_task_with_retry(
        task: Task,
        store: Arc<dyn TaskStore>,
        context: Weak<dyn TaskHandlerContext>,
    ) -> Result<()> {
        let ctx = context.upgrade().ok_or_else(|| {
            anyhow::anyhow!("TaskHandlerContext was dropped, cannot process task")
        })?;

        let timeout_duration = task
            .timeout_seconds
            .map(|s| Duration::from_secs(s.max(1) as u64))
            .unwrap_or(Duration::from_secs(3600));

        let result = tokio::time::timeout(timeout_duration, ctx.dispatch_task(&task)).await;

        match result {
            Ok(Ok(task_result)) => {
                store
                    .mark_completed(task.id, task_result)
                    .await
                    .context("Failed to mark task as completed")?;
                tracing::info!(task_id = %task.id, task_type = %task.task_type, "Task completed successfully");
                Ok(())
            }
            Ok(Err(e)) => {
                let is_unrecoverable = TaskError::is_unrecoverable(&e);

                tracing::error!(
                    task_id = %task.id,
                    error = %e,
                    retry_count = task.retry_count,
                    max_retries = task.max_retries,
                    unrecoverable = is_unrecoverable,
                    "Task execution failed"
                );

                if is_unrecoverable {
                    let error_result = json!({
                        "error": e.to_string(),
                        "retry_count": task.retry_count,
                        "unrecoverable": true,
                        "reason": "Task failed with unrecoverable error"
                    });
                    store
                        .mark_failed(task.id, error_result)
                        .await
                        .context("Failed to mark task as failed")?;
                    tracing::error!(
                        task_id = %task.id,
                        "Task failed with unrecoverable error, will not retry"
                    );
                    return Err(e);
                }

                if task.can_retry() {
                    let run_at = retry_time(task.retry_count);
                    tracing::info!(
                        task_id = %task.id,
                        retry_count = task.retry_count + 1,
                        run_at = %run_at,
                        "Scheduling task retry"
                    );
                    store.retry_at(task.id, run_at).await?;
                    Ok(())
                } else {
                    let error_result = json!({
                        "error": e.to_string(),
                        "retry_count": task.retry_count,
                        "reason": "Task failed after maximum retries"
                    });
                    store
                        .mark_failed(task.id, error_result)
                        .await
                        .context("Failed to mark task as failed")?;
                    tracing::error!(task_id = %task.id, "Task failed after max retries");
                    Err(e)
                }
            }
            Err(_) => {
                tracing::error!(
                    task_id = %task.id,
                    timeout_seconds = ?task.timeout_seconds,
                    "Task execution timed out"
                );
                if task.can_retry() {
                    store.retry_at(task.id, retry_time(task.retry_count)).await?;
                    Ok(())
                } else {
                    let error_result = json!({
                        "error": "Task execution timed out",
                        "timeout_seconds": task.timeout_seconds,
                    });
                    store.mark_failed(task.id, error_result).await?;
                    Err(anyhow::anyhow!("Task execution timed out"))
                }
            }
        }
    }

    /// Signals the worker pool to stop claiming new tasks and exit the main loop.
    ///
    /// Returns immediately after sending the signal. Already-spawned task
    /// handlers keep running until they complete or time out.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}
