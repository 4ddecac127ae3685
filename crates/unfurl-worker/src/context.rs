//! Task handler context trait
//!
//! The service layer implements this trait for its application state. The
//! worker calls `dispatch_task` for every claimed task; the implementation
//! matches on task type and invokes the appropriate handler.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Weak};

use unfurl_core::models::Task;

/// Context for task dispatch.
///
/// The worker holds a weak reference and calls `dispatch_task` when
/// processing a claimed task.
#[async_trait]
pub trait TaskHandlerContext: Send + Sync {
    /// Dispatch a task to the appropriate handler and return the result.
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value>;
}

/// Dispatch always errors.
struct NoopContext;

#[async_trait]
impl TaskHandlerContext for NoopContext {
    async fn dispatch_task(self: Arc<Self>, _task: &Task) -> Result<serde_json::Value> {
        Err(anyhow!("NoopContext: no handler context available"))
    }
}

/// Weak reference to a no-op context, for building a queue before the real
/// context exists. It never upgrades.
pub fn empty_context_weak() -> Weak<dyn TaskHandlerContext> {
    let n: Arc<dyn TaskHandlerContext> = Arc::new(NoopContext);
    Arc::downgrade(&n)
}
