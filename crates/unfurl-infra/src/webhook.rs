//! Metrics-update webhooks
//!
//! Every metrics attempt produces one event, posted as JSON to the configured
//! subscriber. Deliveries run on spawned tasks bounded by a semaphore, so the
//! scheduler never waits on a slow subscriber.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use unfurl_core::WebhookNotifier;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Unfurl-Signature";
const EVENT_NAME: &str = "metrics.updated";

/// Configuration for webhook service
#[derive(Clone)]
pub struct WebhookServiceConfig {
    pub url: String,
    pub secret: Option<String>,
    pub timeout_seconds: u64,
    pub max_concurrent_deliveries: usize,
}

impl WebhookServiceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
            timeout_seconds: 30,
            max_concurrent_deliveries: 50,
        }
    }

    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.filter(|s| !s.is_empty());
        self
    }
}

/// Body of a delivered webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub identity: String,
    pub provider: String,
    pub value: Value,
    pub sent_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn metrics_updated(identity: &str, provider: &str, value: &Value) -> Self {
        Self {
            event: EVENT_NAME.to_string(),
            identity: identity.to_string(),
            provider: provider.to_string(),
            value: value.clone(),
            sent_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct WebhookResponse {
    pub status_code: u16,
    pub body: String,
}

/// Signed webhook delivery
#[derive(Clone)]
pub struct WebhookService {
    http_client: Client,
    config: WebhookServiceConfig,
    semaphore: Arc<Semaphore>,
}

impl WebhookService {
    pub fn new(config: WebhookServiceConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client for webhooks")?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_deliveries.max(1)));

        Ok(Self {
            http_client,
            config,
            semaphore,
        })
    }

    /// Send one event and wait for the subscriber's answer.
    #[tracing::instrument(skip(self, event), fields(identity = %event.identity, provider = %event.provider))]
    pub async fn deliver(&self, event: &WebhookEvent) -> Result<WebhookResponse> {
        let body = serde_json::to_string(event).context("Failed to serialize webhook event")?;

        let mut request = self
            .http_client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "Unfurl-Webhook/1.0");

        if let Some(secret) = &self.config.secret {
            let signature = sign_payload(&body, secret)?;
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", signature));
        }

        let response = request
            .body(body)
            .send()
            .await
            .context("Failed to send webhook request")?;

        let status_code = response.status().as_u16();
        let response_body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("Failed to read response body"));

        if (200..300).contains(&status_code) {
            Ok(WebhookResponse {
                status_code,
                body: response_body,
            })
        } else {
            Err(anyhow::anyhow!(
                "Webhook returned non-2xx status: {} - {}",
                status_code,
                response_body
            ))
        }
    }
}

#[async_trait]
impl WebhookNotifier for WebhookService {
    async fn notify(&self, identity: &str, provider: &str, value: &Value) -> Result<(), String> {
        let event = WebhookEvent::metrics_updated(identity, provider, value);

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| format!("Failed to acquire semaphore permit: {}", e))?;

        let service = self.clone();
        tokio::spawn(async move {
            match service.deliver(&event).await {
                Ok(response) => {
                    tracing::debug!(
                        identity = %event.identity,
                        provider = %event.provider,
                        status_code = response.status_code,
                        "Webhook delivered"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        identity = %event.identity,
                        provider = %event.provider,
                        error = %e,
                        "Webhook delivery failed"
                    );
                }
            }
            drop(permit);
        });

        Ok(())
    }
}

/// HMAC-SHA256 of `body`, hex encoded.
pub fn sign_payload(body: &str, secret: &str) -> Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).context("Invalid signing secret")?;

    mac.update(body.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a received `sha256=<hex>` or bare hex signature.
pub fn verify_signature(body: &str, secret: &str, signature: &str) -> Result<bool> {
    let expected = sign_payload(body, secret)?;
    let given = signature.strip_prefix("sha256=").unwrap_or(signature);
    Ok(expected == given)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn service(url: String, secret: Option<&str>) -> WebhookService {
        let config = WebhookServiceConfig {
            url,
            secret: secret.map(str::to_string),
            timeout_seconds: 5,
            max_concurrent_deliveries: 2,
        };
        WebhookService::new(config).unwrap()
    }

    #[test]
    fn signatures_verify() {
        let signature = sign_payload("{\"a\":1}", "s3cret").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_signature("{\"a\":1}", "s3cret", &signature).unwrap());
        assert!(verify_signature("{\"a\":1}", "s3cret", &format!("sha256={}", signature)).unwrap());
        assert!(!verify_signature("{\"a\":2}", "s3cret", &signature).unwrap());
    }

    #[test]
    fn blank_secret_disables_signing() {
        let config = WebhookServiceConfig::new("http://localhost").with_secret(Some(String::new()));
        assert!(config.secret.is_none());
    }

    #[tokio::test]
    async fn deliver_posts_signed_event() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks")
            .match_header("content-type", "application/json")
            .match_header("x-unfurl-signature", Matcher::Regex("^sha256=[0-9a-f]{64}$".to_string()))
            .match_body(Matcher::PartialJson(json!({
                "event": "metrics.updated",
                "identity": "abc",
                "provider": "facebook",
                "value": {"share_count": 3}
            })))
            .with_status(204)
            .create_async()
            .await;

        let service = service(format!("{}/hooks", server.url()), Some("s3cret"));
        let event = WebhookEvent::metrics_updated("abc", "facebook", &json!({"share_count": 3}));
        let response = service.deliver(&event).await.unwrap();

        assert_eq!(response.status_code, 204);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn deliver_reports_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hooks")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let service = service(format!("{}/hooks", server.url()), None);
        let event = WebhookEvent::metrics_updated("abc", "youtube", &Value::Null);
        let err = service.deliver(&event).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn notify_delivers_in_background() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks")
            .match_header("x-unfurl-signature", Matcher::Missing)
            .match_body(Matcher::PartialJson(json!({"identity": "abc", "value": null})))
            .with_status(200)
            .create_async()
            .await;

        let service = service(format!("{}/hooks", server.url()), None);
        service.notify("abc", "youtube", &Value::Null).await.unwrap();

        for _ in 0..50 {
            if mock.matched_async().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn notify_succeeds_when_subscriber_is_down() {
        let service = service("http://127.0.0.1:9/hooks".to_string(), None);
        assert!(service.notify("abc", "facebook", &json!({})).await.is_ok());
    }
}
