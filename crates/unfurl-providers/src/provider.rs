//! Provider plugin contracts

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use unfurl_core::{current_credential, ApiCredential, CanonicalUrl};
use unfurl_core::models::{ProviderKind, Subtype};

/// Everything a provider call needs about the request being served.
///
/// The credential is passed explicitly; [`FetchContext::from_scope`] picks up
/// the credential activated with `with_credential`.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub canonical: CanonicalUrl,
    pub credential: Option<Arc<ApiCredential>>,
}

impl FetchContext {
    pub fn new(canonical: CanonicalUrl, credential: Option<Arc<ApiCredential>>) -> Self {
        Self {
            canonical,
            credential,
        }
    }

    pub fn from_scope(canonical: CanonicalUrl) -> Self {
        Self::new(canonical, current_credential())
    }

    pub fn credential_id(&self) -> Option<&str> {
        self.credential.as_deref().map(|c| c.id.as_str())
    }

    /// Google API key of the active credential, if set and non-empty.
    pub fn google_api_key(&self) -> Option<&str> {
        self.credential
            .as_deref()
            .and_then(|c| c.google_api_key.as_deref())
            .filter(|k| !k.trim().is_empty())
    }

    /// Facebook app id and secret of the active credential.
    pub fn facebook_app(&self) -> Option<(&str, &str)> {
        facebook_app_of(self.credential.as_deref())
    }
}

pub(crate) fn facebook_app_of(credential: Option<&ApiCredential>) -> Option<(&str, &str)> {
    let credential = credential?;
    let id = credential.facebook_app_id.as_deref().filter(|v| !v.is_empty())?;
    let secret = credential
        .facebook_app_secret
        .as_deref()
        .filter(|v| !v.is_empty())?;
    Some((id, secret))
}

/// A thumbnail candidate labelled with its provider resolution name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub label: String,
    pub url: String,
}

impl Thumbnail {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }
}

/// Normalized result of a metadata extraction
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub subtype: Subtype,
    pub title: String,
    pub author_name: String,
    pub author_url: String,
    pub author_picture: String,
    pub username: String,
    pub description: String,
    pub published_at: String,
    pub external_id: String,
    pub html: String,
    /// Provider API response, untouched
    pub raw: Option<Value>,
    /// oEmbed endpoint advertised by the page
    pub oembed_url: Option<String>,
    pub thumbnails: Vec<Thumbnail>,
    /// The provider confirmed the resource no longer exists
    pub absent: bool,
}

impl Extraction {
    pub fn new(subtype: Subtype) -> Self {
        Self {
            subtype,
            title: String::new(),
            author_name: String::new(),
            author_url: String::new(),
            author_picture: String::new(),
            username: String::new(),
            description: String::new(),
            published_at: String::new(),
            external_id: String::new(),
            html: String::new(),
            raw: None,
            oembed_url: None,
            thumbnails: Vec::new(),
            absent: false,
        }
    }

    pub fn absent(subtype: Subtype) -> Self {
        Self {
            absent: true,
            ..Self::new(subtype)
        }
    }
}

/// Extraction failures. None of these are cached.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Request failed: {0}")]
    Network(String),

    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("Unparseable response: {0}")]
    Parse(String),

    #[error("{0}")]
    MissingCredential(String),

    #[error("{message}")]
    Api { code: i64, message: String },
}

impl ExtractError {
    /// Errors the provider reported about the request itself, as opposed to
    /// transport or upstream trouble.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            ExtractError::MissingCredential(_) | ExtractError::Api { .. }
        )
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(e: reqwest::Error) -> Self {
        ExtractError::Network(e.to_string())
    }
}

/// A provider plugin
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Subtype a URL resolves to, from its shape alone.
    fn subtype_for(&self, url: &CanonicalUrl) -> Subtype;

    async fn extract_metadata(&self, ctx: &FetchContext) -> Result<Extraction, ExtractError>;

    /// Fetch the oEmbed document, using the link discovered during metadata
    /// extraction when the provider relies on discovery. `Ok(None)` when the
    /// media has no oEmbed representation.
    async fn extract_oembed(
        &self,
        ctx: &FetchContext,
        discovered: Option<&str>,
    ) -> Result<Option<Value>, ExtractError>;

    /// Resolution labels from lowest to highest.
    fn thumbnail_ladder(&self) -> &'static [&'static str];

    fn list_thumbnails(&self, extraction: &Extraction, oembed: Option<&Value>) -> Vec<Thumbnail> {
        let mut thumbnails = extraction.thumbnails.clone();
        if let Some(url) = oembed
            .and_then(|o| o.get("thumbnail_url"))
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
        {
            thumbnails.push(Thumbnail::new("oembed", url));
        }
        thumbnails
    }

    /// Names of the metrics sources polled for media of this subtype.
    fn metrics_sources(&self, subtype: Subtype) -> &'static [&'static str];
}

/// Input of one metrics attempt
#[derive(Debug, Clone)]
pub struct MetricsRequest {
    pub url: String,
    pub external_id: String,
    pub credential: Option<Arc<ApiCredential>>,
}

/// Outcome of one metrics request that reached the provider
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsReply {
    Success(Value),
    Failure { code: i64, message: String, body: Value },
}

/// How a provider error code is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Permanent(&'static str),
    RateLimited,
    Other,
}

/// Per-source table of permanent and rate-limit error codes
#[derive(Debug, Clone, Copy)]
pub struct ErrorCodePolicy {
    pub permanent: &'static [(i64, &'static str)],
    pub rate_limited: &'static [i64],
}

impl ErrorCodePolicy {
    pub fn classify(&self, code: i64) -> ErrorClass {
        if let Some((_, message)) = self.permanent.iter().find(|(c, _)| *c == code) {
            return ErrorClass::Permanent(message);
        }
        if self.rate_limited.contains(&code) {
            return ErrorClass::RateLimited;
        }
        ErrorClass::Other
    }
}

/// A metrics source polled by the scheduler
#[async_trait]
pub trait MetricsFetcher: Send + Sync {
    /// Key of the value in `MediaRecord::metrics`
    fn name(&self) -> &'static str;

    fn error_policy(&self) -> ErrorCodePolicy;

    /// Run the request chain. `Err` is reserved for unexpected failures
    /// (transport, parse, missing configuration).
    async fn fetch(&self, request: &MetricsRequest) -> anyhow::Result<MetricsReply>;
}

/// Parse `{"error": {"code", "message"}}` bodies used by Google and Graph APIs.
pub(crate) fn api_error(body: &Value) -> Option<(i64, String)> {
    let error = body.get("error")?;
    let code = match error.get("code")? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}
