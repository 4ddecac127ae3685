//! Application state
//!
//! Builds every collaborator from [`Config`]: Postgres-backed stores when a
//! database is configured and in-memory stores otherwise.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use unfurl_core::{
    CachePurger, Config, NoOpCachePurger, NoOpWebhookNotifier, TelemetryReporter, WebhookNotifier,
};
use unfurl_db::{
    connect, InMemoryMediaCache, InMemoryPollStateStore, InMemoryTaskStore, MediaCache,
    PgMediaCache, PgPollStateStore, PgTaskStore, PollStateStore, TaskStore,
};
use unfurl_infra::{
    CloudflareConfig, CloudflarePurger, TracingReporter, WebhookService, WebhookServiceConfig,
};
use unfurl_providers::ProviderRegistry;
use unfurl_storage::create_storage;
use unfurl_worker::{TaskQueue, TaskQueueConfig};

use crate::credentials::CredentialRotator;
use crate::metrics::MetricsScheduler;
use crate::resolver::MediaResolver;

pub struct AppState {
    pub config: Config,
    pub resolver: Arc<MediaResolver>,
    pub metrics: Arc<MetricsScheduler>,
    pub tasks: Arc<dyn TaskStore>,
    /// Submission handle; the worker pool is started by [`AppState::start_worker`]
    pub queue: TaskQueue,
    pub pool: Option<sqlx::PgPool>,
}

impl AppState {
    pub async fn from_config(config: &Config) -> anyhow::Result<Arc<Self>> {
        config.validate()?;

        let (cache, tasks, polls, pool): (
            Arc<dyn MediaCache>,
            Arc<dyn TaskStore>,
            Arc<dyn PollStateStore>,
            Option<sqlx::PgPool>,
        ) = match config.database_url() {
            Some(url) => {
                let pool = connect(url, config.db_max_connections()).await?;
                (
                    Arc::new(PgMediaCache::new(pool.clone())),
                    Arc::new(PgTaskStore::new(pool.clone())),
                    Arc::new(PgPollStateStore::new(pool.clone())),
                    Some(pool),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores");
                (
                    Arc::new(InMemoryMediaCache::new()),
                    Arc::new(InMemoryTaskStore::new()),
                    Arc::new(InMemoryPollStateStore::new()),
                    None,
                )
            }
        };

        let storage = create_storage(config)
            .await
            .context("Failed to initialize object store")?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds()))
            .build()
            .context("Failed to create HTTP client")?;

        let registry = Arc::new(ProviderRegistry::with_defaults(http.clone()));
        let credentials = Arc::new(CredentialRotator::new(config.credentials().to_vec()));
        tracing::info!(credentials = credentials.len(), "API credentials loaded");

        let webhook: Arc<dyn WebhookNotifier> = match config.webhook_url() {
            Some(url) => {
                let mut webhook_config = WebhookServiceConfig::new(url)
                    .with_secret(config.webhook_secret().map(str::to_string));
                webhook_config.timeout_seconds = config.webhook_timeout_seconds();
                webhook_config.max_concurrent_deliveries = config.webhook_max_concurrent_deliveries();
                tracing::info!(url = %url, "Webhook delivery enabled");
                Arc::new(WebhookService::new(webhook_config)?)
            }
            None => Arc::new(NoOpWebhookNotifier),
        };

        let purger: Arc<dyn CachePurger> = match config.cloudflare() {
            Some((zone, email, key)) => {
                tracing::info!(zone = %zone, "Edge cache purge enabled");
                Arc::new(CloudflarePurger::new(
                    http.clone(),
                    CloudflareConfig::new(zone, email, key),
                ))
            }
            None => Arc::new(NoOpCachePurger),
        };

        let telemetry: Arc<dyn TelemetryReporter> = Arc::new(TracingReporter);
        let queue = TaskQueue::new_no_worker(tasks.clone(), TaskQueueConfig::from(config));

        let metrics = Arc::new(MetricsScheduler::new(
            registry.clone(),
            cache.clone(),
            polls,
            queue.clone(),
            webhook,
            telemetry.clone(),
            credentials.clone(),
            config.metrics_policy(),
        ));

        let resolver = Arc::new(MediaResolver::new(
            registry,
            cache,
            storage,
            http,
            purger,
            telemetry,
            credentials,
            metrics.clone(),
            config.public_base_url(),
        ));

        Ok(Arc::new(Self {
            config: config.clone(),
            resolver,
            metrics,
            tasks,
            queue,
            pool,
        }))
    }

    /// Spawn the worker pool that runs queued resolutions and metrics attempts.
    pub fn start_worker(self: &Arc<Self>) -> TaskQueue {
        let config = TaskQueueConfig::from(&self.config);
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = self.pool.is_some(),
            "Starting task worker"
        );
        let context: Arc<dyn unfurl_worker::TaskHandlerContext> = self.clone();
        TaskQueue::new(
            self.tasks.clone(),
            config,
            Arc::downgrade(&context),
            self.pool.clone(),
        )
    }
}
