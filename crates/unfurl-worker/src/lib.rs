//! Unfurl Worker
//!
//! Claims due tasks from a [`unfurl_db::TaskStore`] and hands them to a
//! [`TaskHandlerContext`], retrying recoverable failures with backoff.

pub mod context;
pub mod queue;

pub use context::{empty_context_weak, TaskHandlerContext};
pub use queue::{TaskQueue, TaskQueueConfig, MAX_RETRY_BACKOFF_SECS};
