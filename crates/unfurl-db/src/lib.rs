//! Unfurl Database Layer
//!
//! Store traits for the media cache, the durable task queue and metrics
//! polling state, with Postgres repositories and in-memory implementations.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod traits;

pub use memory::{InMemoryMediaCache, InMemoryPollStateStore, InMemoryTaskStore};
#[cfg(feature = "postgres")]
pub use postgres::{connect, PgMediaCache, PgPollStateStore, PgTaskStore, TASK_NOTIFY_CHANNEL};
pub use traits::{MediaCache, PollStateStore, TaskStore};
