//! Collaborator contracts
//!
//! The resolver and the metrics scheduler talk to the outside world through
//! these traits. `unfurl-infra` provides the HTTP and tracing implementations;
//! the no-op versions are used when a collaborator is not configured.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Delivers metrics updates to subscribers.
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    /// Announce a new metrics value for `(identity, provider)`. `value` is
    /// `Value::Null` when the attempt produced nothing.
    async fn notify(&self, identity: &str, provider: &str, value: &Value) -> Result<(), String>;
}

/// Context attached to a telemetry report
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportContext {
    pub url: Option<String>,
    pub key_id: Option<String>,
    pub provider: Option<String>,
    pub error_code: Option<String>,
    pub error_body: Option<Value>,
}

impl ReportContext {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn key_id(mut self, key_id: Option<String>) -> Self {
        self.key_id = key_id;
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn error_code(mut self, code: impl ToString) -> Self {
        self.error_code = Some(code.to_string());
        self
    }

    pub fn error_body(mut self, body: Value) -> Self {
        self.error_body = Some(body);
        self
    }
}

/// Error-reporting sink. Reports never fail the caller.
pub trait TelemetryReporter: Send + Sync {
    fn report(&self, message: &str, context: &ReportContext);
}

/// Invalidates edge-cached copies of a resource.
#[async_trait]
pub trait CachePurger: Send + Sync {
    async fn purge(&self, url: &str) -> Result<(), String>;
}

pub struct NoOpWebhookNotifier;

#[async_trait]
impl WebhookNotifier for NoOpWebhookNotifier {
    async fn notify(&self, _identity: &str, _provider: &str, _value: &Value) -> Result<(), String> {
        Ok(())
    }
}

pub struct NoOpTelemetryReporter;

impl TelemetryReporter for NoOpTelemetryReporter {
    fn report(&self, _message: &str, _context: &ReportContext) {}
}

pub struct NoOpCachePurger;

#[async_trait]
impl CachePurger for NoOpCachePurger {
    async fn purge(&self, _url: &str) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn report_context_builder() {
        let ctx = ReportContext::for_url("https://example.com/a")
            .key_id(Some("k1".to_string()))
            .provider("facebook")
            .error_code(4)
            .error_body(json!({"code": 4}));
        assert_eq!(ctx.url.as_deref(), Some("https://example.com/a"));
        assert_eq!(ctx.key_id.as_deref(), Some("k1"));
        assert_eq!(ctx.provider.as_deref(), Some("facebook"));
        assert_eq!(ctx.error_code.as_deref(), Some("4"));
        assert_eq!(ctx.error_body, Some(json!({"code": 4})));
    }

    #[tokio::test]
    async fn noop_collaborators_succeed() {
        assert!(NoOpWebhookNotifier
            .notify("id", "facebook", &Value::Null)
            .await
            .is_ok());
        assert!(NoOpCachePurger.purge("https://example.com").await.is_ok());
        NoOpTelemetryReporter.report("ignored", &ReportContext::default());
    }
}
