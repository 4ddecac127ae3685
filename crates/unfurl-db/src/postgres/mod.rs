//! Postgres-backed stores.

mod media;
mod poll_state;
mod task;

pub use media::PgMediaCache;
pub use poll_state::PgPollStateStore;
pub use task::{PgTaskStore, TASK_NOTIFY_CHANNEL};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Open a connection pool and apply pending migrations.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(max_connections, "Database connected successfully");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}
