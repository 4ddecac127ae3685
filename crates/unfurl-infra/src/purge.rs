//! Cloudflare purge-by-URL

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use unfurl_core::CachePurger;

const DEFAULT_API_BASE: &str = "https://api.cloudflare.com";

#[derive(Debug, Clone)]
pub struct CloudflareConfig {
    pub zone: String,
    pub auth_email: String,
    pub auth_key: String,
}

impl CloudflareConfig {
    pub fn new(zone: &str, auth_email: &str, auth_key: &str) -> Self {
        Self {
            zone: zone.to_string(),
            auth_email: auth_email.to_string(),
            auth_key: auth_key.to_string(),
        }
    }
}

/// Purges single URLs from the Cloudflare edge
#[derive(Clone)]
pub struct CloudflarePurger {
    client: Client,
    config: CloudflareConfig,
    api_base: String,
}

impl CloudflarePurger {
    pub fn new(client: Client, config: CloudflareConfig) -> Self {
        Self {
            client,
            config,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn purge_files(&self, files: &[&str]) -> anyhow::Result<()> {
        let endpoint = format!(
            "{}/client/v4/zones/{}/purge_cache",
            self.api_base.trim_end_matches('/'),
            self.config.zone
        );

        let response = self
            .client
            .post(&endpoint)
            .header("X-Auth-Email", &self.config.auth_email)
            .header("X-Auth-Key", &self.config.auth_key)
            .json(&json!({ "files": files }))
            .send()
            .await
            .context("Failed to send purge request")?;

        let body: Value = response
            .json()
            .await
            .context("Failed to parse purge response")?;

        if body.get("success").and_then(Value::as_bool) == Some(true) {
            return Ok(());
        }

        let first = body.get("errors").and_then(|e| e.get(0));
        let code = first
            .and_then(|e| e.get("code"))
            .map(|c| match c {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        let message = first
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        Err(anyhow::anyhow!("{} {}", code, message))
    }
}

#[async_trait]
impl CachePurger for CloudflarePurger {
    async fn purge(&self, url: &str) -> Result<(), String> {
        match self.purge_files(&[url]).await {
            Ok(()) => {
                tracing::debug!(url = %url, "Edge cache purged");
                Ok(())
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "[Cloudflare] purge failed");
                Err(e.to_string())
            }
        }
    }
}
