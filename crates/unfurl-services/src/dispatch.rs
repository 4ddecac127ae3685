//! Queued task handlers
//!
//! The worker hands every claimed task to [`AppState`], which routes it by
//! type. Resolution failures that may clear up on their own are retried;
//! everything else fails the task for good.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use unfurl_core::models::{MetricsPollPayload, ResolveMediaPayload, Task, TaskType};
use unfurl_core::{ErrorMetadata, TaskError};
use unfurl_worker::TaskHandlerContext;

use crate::metrics::MetricsScheduler;
use crate::resolver::{MediaResolver, ResolveOptions};
use crate::state::AppState;

/// Run a queued resolution.
pub async fn handle_resolve_media(resolver: &MediaResolver, task: &Task) -> Result<Value> {
    let payload: ResolveMediaPayload = task
        .try_payload_as()
        .map_err(|e| TaskError::unrecoverable(anyhow::anyhow!("Invalid resolve payload: {}", e)))?;

    let options = ResolveOptions {
        force: payload.force,
        credential_id: payload.credential_id.clone(),
    };

    match resolver.resolve(&payload.url, &options).await {
        Ok(record) => Ok(json!({
            "identity": record.identity,
            "canonical_url": record.canonical_url,
        })),
        Err(e) if e.is_recoverable() => Err(TaskError::recoverable(e).into()),
        Err(e) => Err(TaskError::unrecoverable(e).into()),
    }
}

/// Run one metrics attempt. The attempt schedules its own successor, so the
/// task itself never retries.
pub async fn handle_metrics_poll(metrics: &MetricsScheduler, task: &Task) -> Result<Value> {
    let payload: MetricsPollPayload = task
        .try_payload_as()
        .map_err(|e| TaskError::unrecoverable(anyhow::anyhow!("Invalid metrics payload: {}", e)))?;

    let phase = metrics
        .run_attempt(&payload)
        .await
        .map(|state| state.phase.to_string());
    Ok(json!({
        "identity": payload.identity,
        "provider": payload.provider,
        "phase": phase,
    }))
}

#[async_trait]
impl TaskHandlerContext for AppState {
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<Value> {
        match task.task_type {
            TaskType::ResolveMedia => handle_resolve_media(&self.resolver, task).await,
            TaskType::MetricsPoll => handle_metrics_poll(&self.metrics, task).await,
        }
    }
}
