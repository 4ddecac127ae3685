//! Configuration module
//!
//! Settings are read from the environment (with `.env` support through
//! `dotenvy`). Every numeric setting has a default declared next to the code
//! that parses it; `validate` checks the cross-field rules.

use chrono::Duration;
use std::collections::HashSet;
use std::env;

use crate::credentials::ApiCredential;
use crate::models::MetricsPolicy;
use crate::storage_types::StorageBackend;

// Common constants
const MAX_CONNECTIONS: u32 = 10;
const HTTP_TIMEOUT_SECS: u64 = 20;
const DEFAULT_CREDENTIAL_ID: &str = "default";

/// Resolver and worker configuration
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    pub environment: String,
    /// Postgres connection string; in-memory stores are used when absent
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    // Object store
    pub storage_backend: StorageBackend,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    /// Public base URL of the service, used to build edge-cache purge targets
    pub public_base_url: String,
    // Provider access
    pub http_timeout_seconds: u64,
    pub credentials: Vec<ApiCredential>,
    // Webhook delivery
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_timeout_seconds: u64,
    pub webhook_max_concurrent_deliveries: usize,
    // Edge cache purge
    pub cloudflare_zone: Option<String>,
    pub cloudflare_auth_email: Option<String>,
    pub cloudflare_auth_key: Option<String>,
    // Task queue configuration
    pub task_queue_max_workers: usize,
    pub task_queue_poll_interval_ms: u64,
    pub task_queue_default_timeout_seconds: i32,
    pub task_queue_max_retries: i32,
    /// Interval in seconds between runs of the stale task reaper. 0 = disabled.
    pub task_queue_stale_task_reap_interval_secs: u64,
    /// Grace period in seconds added to task timeout before reaping stale running tasks.
    pub task_queue_stale_task_grace_period_secs: i64,
    // Metrics polling
    pub metrics_policy: MetricsPolicy,
    /// "json" or "pretty"
    pub log_format: String,
}

impl ResolverConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        const TASK_QUEUE_MAX_WORKERS: usize = 4;
        const TASK_QUEUE_POLL_INTERVAL_MS: u64 = 1000;
        const TASK_QUEUE_DEFAULT_TIMEOUT_SECS: i32 = 300;
        const TASK_QUEUE_MAX_RETRIES: i32 = 3;
        const STALE_TASK_REAP_INTERVAL_SECS: u64 = 60;
        const STALE_TASK_GRACE_PERIOD_SECS: i64 = 300;
        const WEBHOOK_TIMEOUT_SECS: u64 = 30;
        const WEBHOOK_MAX_CONCURRENT_DELIVERIES: usize = 50;
        const METRICS_MAX_ATTEMPTS: i32 = 10;
        const METRICS_REFRESH_HOURS: i64 = 24;
        const METRICS_RATE_LIMIT_DELAY_MINUTES: i64 = 60;

        let parse_or = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let local_storage_path = lookup("LOCAL_STORAGE_PATH");
        let storage_backend = match lookup("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None if local_storage_path.is_some() => StorageBackend::Local,
            None => StorageBackend::Memory,
        };

        let credentials = Self::credentials_from(&lookup)?;

        let metrics_policy = MetricsPolicy {
            max_attempts: parse_or("METRICS_MAX_ATTEMPTS", &METRICS_MAX_ATTEMPTS.to_string())
                .parse()
                .unwrap_or(METRICS_MAX_ATTEMPTS),
            refresh_interval: Duration::hours(
                parse_or("METRICS_REFRESH_HOURS", &METRICS_REFRESH_HOURS.to_string())
                    .parse()
                    .unwrap_or(METRICS_REFRESH_HOURS),
            ),
            rate_limit_delay: Duration::minutes(
                parse_or(
                    "METRICS_RATE_LIMIT_DELAY_MINUTES",
                    &METRICS_RATE_LIMIT_DELAY_MINUTES.to_string(),
                )
                .parse()
                .unwrap_or(METRICS_RATE_LIMIT_DELAY_MINUTES),
            ),
        };

        Ok(ResolverConfig {
            environment,
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", &MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            storage_backend,
            local_storage_path,
            local_storage_base_url: lookup("LOCAL_STORAGE_BASE_URL"),
            public_base_url: parse_or("PUBLIC_BASE_URL", "http://localhost:3200")
                .trim_end_matches('/')
                .to_string(),
            http_timeout_seconds: parse_or("HTTP_TIMEOUT_SECONDS", &HTTP_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(HTTP_TIMEOUT_SECS),
            credentials,
            webhook_url: lookup("WEBHOOK_URL"),
            webhook_secret: lookup("WEBHOOK_SECRET"),
            webhook_timeout_seconds: parse_or(
                "WEBHOOK_TIMEOUT_SECONDS",
                &WEBHOOK_TIMEOUT_SECS.to_string(),
            )
            .parse()
            .unwrap_or(WEBHOOK_TIMEOUT_SECS),
            webhook_max_concurrent_deliveries: parse_or(
                "WEBHOOK_MAX_CONCURRENT_DELIVERIES",
                &WEBHOOK_MAX_CONCURRENT_DELIVERIES.to_string(),
            )
            .parse()
            .unwrap_or(WEBHOOK_MAX_CONCURRENT_DELIVERIES),
            cloudflare_zone: lookup("CLOUDFLARE_ZONE"),
            cloudflare_auth_email: lookup("CLOUDFLARE_AUTH_EMAIL"),
            cloudflare_auth_key: lookup("CLOUDFLARE_AUTH_KEY"),
            task_queue_max_workers: parse_or(
                "TASK_QUEUE_MAX_WORKERS",
                &TASK_QUEUE_MAX_WORKERS.to_string(),
            )
            .parse()
            .unwrap_or(TASK_QUEUE_MAX_WORKERS),
            task_queue_poll_interval_ms: parse_or(
                "TASK_QUEUE_POLL_INTERVAL_MS",
                &TASK_QUEUE_POLL_INTERVAL_MS.to_string(),
            )
            .parse()
            .unwrap_or(TASK_QUEUE_POLL_INTERVAL_MS),
            task_queue_default_timeout_seconds: parse_or(
                "TASK_QUEUE_DEFAULT_TIMEOUT_SECONDS",
                &TASK_QUEUE_DEFAULT_TIMEOUT_SECS.to_string(),
            )
            .parse()
            .unwrap_or(TASK_QUEUE_DEFAULT_TIMEOUT_SECS),
            task_queue_max_retries: parse_or(
                "TASK_QUEUE_MAX_RETRIES",
                &TASK_QUEUE_MAX_RETRIES.to_string(),
            )
            .parse()
            .unwrap_or(TASK_QUEUE_MAX_RETRIES),
            task_queue_stale_task_reap_interval_secs: parse_or(
                "STALE_TASK_REAP_INTERVAL_SECS",
                &STALE_TASK_REAP_INTERVAL_SECS.to_string(),
            )
            .parse()
            .unwrap_or(STALE_TASK_REAP_INTERVAL_SECS),
            task_queue_stale_task_grace_period_secs: parse_or(
                "STALE_TASK_GRACE_PERIOD_SECS",
                &STALE_TASK_GRACE_PERIOD_SECS.to_string(),
            )
            .parse()
            .unwrap_or(STALE_TASK_GRACE_PERIOD_SECS),
            metrics_policy,
            log_format: parse_or("LOG_FORMAT", "pretty").to_lowercase(),
        })
    }

    /// The default credential comes from the single-key variables; extra
    /// credentials from `API_CREDENTIALS`, a JSON array of credential objects.
    fn credentials_from<F>(lookup: &F) -> Result<Vec<ApiCredential>, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut credentials = Vec::new();

        let google_api_key = lookup("GOOGLE_API_KEY");
        let facebook_app_id = lookup("FACEBOOK_APP_ID");
        let facebook_app_secret = lookup("FACEBOOK_APP_SECRET");
        if google_api_key.is_some() || facebook_app_id.is_some() {
            credentials.push(ApiCredential {
                id: DEFAULT_CREDENTIAL_ID.to_string(),
                google_api_key,
                facebook_app_id,
                facebook_app_secret,
                ..Default::default()
            });
        }

        if let Some(raw) = lookup("API_CREDENTIALS").filter(|s| !s.trim().is_empty()) {
            let extra: Vec<ApiCredential> = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("API_CREDENTIALS must be a JSON array: {}", e))?;
            credentials.extend(extra);
        }

        Ok(credentials)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        } else if self.is_production() {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be set in production; metrics schedules must survive restarts"
            ));
        }

        if self.storage_backend == StorageBackend::Local {
            if self.local_storage_path.is_none() {
                return Err(anyhow::anyhow!(
                    "LOCAL_STORAGE_PATH must be set when using local storage backend"
                ));
            }
            if self.local_storage_base_url.is_none() {
                return Err(anyhow::anyhow!(
                    "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                ));
            }
        }

        let cloudflare = [
            &self.cloudflare_zone,
            &self.cloudflare_auth_email,
            &self.cloudflare_auth_key,
        ];
        let set = cloudflare.iter().filter(|v| v.is_some()).count();
        if set != 0 && set != cloudflare.len() {
            return Err(anyhow::anyhow!(
                "CLOUDFLARE_ZONE, CLOUDFLARE_AUTH_EMAIL and CLOUDFLARE_AUTH_KEY must be set together"
            ));
        }

        if self.webhook_secret.is_some() && self.webhook_url.is_none() {
            return Err(anyhow::anyhow!("WEBHOOK_SECRET requires WEBHOOK_URL"));
        }

        if self.metrics_policy.max_attempts < 1 {
            return Err(anyhow::anyhow!("METRICS_MAX_ATTEMPTS must be at least 1"));
        }

        let mut ids = HashSet::new();
        for credential in &self.credentials {
            if credential.id.trim().is_empty() {
                return Err(anyhow::anyhow!("API credentials must have a non-empty id"));
            }
            if !ids.insert(credential.id.as_str()) {
                return Err(anyhow::anyhow!(
                    "Duplicate API credential id '{}'",
                    credential.id
                ));
            }
        }

        Ok(())
    }

    fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config(pub Box<ResolverConfig>);

impl Config {
    fn inner(&self) -> &ResolverConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = ResolverConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        self.inner().is_production()
    }

    // Convenience getters for common fields
    pub fn environment(&self) -> &str {
        &self.inner().environment
    }

    pub fn database_url(&self) -> Option<&str> {
        self.inner().database_url.as_deref()
    }

    pub fn db_max_connections(&self) -> u32 {
        self.inner().db_max_connections
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.inner().storage_backend
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.inner().local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.inner().local_storage_base_url.as_deref()
    }

    pub fn public_base_url(&self) -> &str {
        &self.inner().public_base_url
    }

    pub fn http_timeout_seconds(&self) -> u64 {
        self.inner().http_timeout_seconds
    }

    pub fn credentials(&self) -> &[ApiCredential] {
        &self.inner().credentials
    }

    pub fn webhook_url(&self) -> Option<&str> {
        self.inner().webhook_url.as_deref()
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.inner().webhook_secret.as_deref()
    }

    pub fn webhook_timeout_seconds(&self) -> u64 {
        self.inner().webhook_timeout_seconds
    }

    pub fn webhook_max_concurrent_deliveries(&self) -> usize {
        self.inner().webhook_max_concurrent_deliveries
    }

    /// (zone, auth email, auth key) when edge purging is configured
    pub fn cloudflare(&self) -> Option<(&str, &str, &str)> {
        let c = self.inner();
        match (&c.cloudflare_zone, &c.cloudflare_auth_email, &c.cloudflare_auth_key) {
            (Some(zone), Some(email), Some(key)) => {
                Some((zone.as_str(), email.as_str(), key.as_str()))
            }
            _ => None,
        }
    }

    pub fn task_queue_max_workers(&self) -> usize {
        self.inner().task_queue_max_workers
    }

    pub fn task_queue_poll_interval_ms(&self) -> u64 {
        self.inner().task_queue_poll_interval_ms
    }

    pub fn task_queue_default_timeout_seconds(&self) -> i32 {
        self.inner().task_queue_default_timeout_seconds
    }

    pub fn task_queue_max_retries(&self) -> i32 {
        self.inner().task_queue_max_retries
    }

    pub fn task_queue_stale_task_reap_interval_secs(&self) -> u64 {
        self.inner().task_queue_stale_task_reap_interval_secs
    }

    pub fn task_queue_stale_task_grace_period_secs(&self) -> i64 {
        self.inner().task_queue_stale_task_grace_period_secs
    }

    pub fn metrics_policy(&self) -> MetricsPolicy {
        self.inner().metrics_policy
    }

    pub fn log_json(&self) -> bool {
        self.inner().log_format == "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ResolverConfig, anyhow::Error> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ResolverConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.environment, "development");
        assert!(config.database_url.is_none());
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.metrics_policy, MetricsPolicy::default());
        assert_eq!(config.task_queue_max_workers, 4);
        assert!(config.credentials.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("TASK_QUEUE_MAX_WORKERS", "many"),
            ("METRICS_REFRESH_HOURS", "12"),
            ("METRICS_RATE_LIMIT_DELAY_MINUTES", "soon"),
        ])
        .unwrap();
        assert_eq!(config.task_queue_max_workers, 4);
        assert_eq!(config.metrics_policy.refresh_interval, Duration::hours(12));
        assert_eq!(config.metrics_policy.rate_limit_delay, Duration::hours(1));
    }

    #[test]
    fn builds_default_and_extra_credentials() {
        let config = config_from(&[
            ("GOOGLE_API_KEY", "AIza-default"),
            ("FACEBOOK_APP_ID", "123"),
            ("FACEBOOK_APP_SECRET", "s3cret"),
            (
                "API_CREDENTIALS",
                r#"[{"id": "backup", "google_api_key": "AIza-backup"}]"#,
            ),
        ])
        .unwrap();
        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.credentials[0].id, "default");
        assert_eq!(config.credentials[0].facebook_app_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.credentials[1].id, "backup");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_credentials() {
        assert!(config_from(&[("API_CREDENTIALS", "not json")]).is_err());

        let config = config_from(&[
            ("GOOGLE_API_KEY", "a"),
            ("API_CREDENTIALS", r#"[{"id": "default"}]"#),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn local_storage_requires_path_and_url() {
        let config = config_from(&[("STORAGE_BACKEND", "local")]).unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("LOCAL_STORAGE_PATH", "/tmp/unfurl"),
            ("LOCAL_STORAGE_BASE_URL", "http://localhost:3200/files"),
        ])
        .unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Local);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_cloudflare_settings_are_rejected() {
        let config = config_from(&[("CLOUDFLARE_ZONE", "zone")]).unwrap();
        assert!(config.validate().is_err());

        let config = Config(Box::new(
            config_from(&[
                ("CLOUDFLARE_ZONE", "zone"),
                ("CLOUDFLARE_AUTH_EMAIL", "ops@example.com"),
                ("CLOUDFLARE_AUTH_KEY", "key"),
            ])
            .unwrap(),
        ));
        assert!(config.validate().is_ok());
        assert_eq!(config.cloudflare(), Some(("zone", "ops@example.com", "key")));
    }

    #[test]
    fn production_requires_postgres() {
        let config = config_from(&[("ENVIRONMENT", "production")]).unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("ENVIRONMENT", "production"),
            ("DATABASE_URL", "mysql://localhost/unfurl"),
        ])
        .unwrap();
        assert!(config.validate().is_err());

        let config = config_from(&[
            ("ENVIRONMENT", "production"),
            ("DATABASE_URL", "postgres://localhost/unfurl"),
        ])
        .unwrap();
        assert!(config.validate().is_ok());
    }
}
