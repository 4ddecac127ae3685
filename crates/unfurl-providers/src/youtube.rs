//! YouTube provider: Data API v3 for items and channels, oEmbed for items and
//! statistics as the `youtube` metrics source.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;

use unfurl_core::models::{ProviderKind, Subtype};
use unfurl_core::CanonicalUrl;

use crate::oembed::fetch_oembed;
use crate::provider::{
    api_error, ErrorCodePolicy, ExtractError, Extraction, FetchContext, MetricsFetcher,
    MetricsReply, MetricsRequest, Provider, Thumbnail,
};

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const DEFAULT_OEMBED_BASE: &str = "https://www.youtube.com";
const CHANNEL_URL_PREFIX: &str = "https://www.youtube.com/channel/";

pub const MISSING_API_KEY: &str = "The request is missing a valid API key.";

const THUMBNAIL_LADDER: &[&str] = &["default", "medium", "high", "standard", "maxres"];

const METRICS_POLICY: ErrorCodePolicy = ErrorCodePolicy {
    permanent: &[(400, "Bad request"), (403, "Forbidden"), (404, "Video not found")],
    rate_limited: &[429],
};

/// Thin client over the Data API
#[derive(Clone)]
struct DataApi {
    client: reqwest::Client,
    base: String,
}

impl DataApi {
    async fn get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, ExtractError> {
        let url = format!("{}/{}", self.base.trim_end_matches('/'), endpoint);
        let response = self.client.get(&url).query(params).send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            if let Some((code, message)) = body.as_ref().and_then(api_error) {
                return Err(ExtractError::Api { code, message });
            }
            return Err(ExtractError::Status {
                status: status.as_u16(),
            });
        }

        body.ok_or_else(|| ExtractError::Parse(format!("{} response is not JSON", endpoint)))
    }
}

fn first_item(body: &Value) -> Option<&Value> {
    body.get("items").and_then(Value::as_array).and_then(|items| items.first())
}

fn text(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn thumbnails_of(snippet: &Value) -> Vec<Thumbnail> {
    snippet
        .get("thumbnails")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(label, t)| {
                    t.get("url")
                        .and_then(Value::as_str)
                        .map(|url| Thumbnail::new(label.as_str(), url))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn embed_html(video_id: &str) -> String {
    format!(
        "<iframe width=\"480\" height=\"270\" src=\"https://www.youtube.com/embed/{}?feature=oembed\" \
         frameborder=\"0\" allow=\"autoplay; encrypted-media\" allowfullscreen></iframe>",
        video_id
    )
}

/// How a channel URL is looked up in the Data API
fn channel_lookup(url: &CanonicalUrl) -> Option<(&'static str, String)> {
    match url.segments().as_slice() {
        ["channel", id, ..] => Some(("id", id.to_string())),
        ["user", name, ..] => Some(("forUsername", name.to_string())),
        ["c", name, ..] => Some(("forHandle", name.to_string())),
        [handle, ..] if handle.starts_with('@') => Some(("forHandle", handle.to_string())),
        _ => None,
    }
}

pub struct YoutubeProvider {
    api: DataApi,
    oembed_base: String,
}

impl YoutubeProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            api: DataApi {
                client,
                base: DEFAULT_API_BASE.to_string(),
            },
            oembed_base: DEFAULT_OEMBED_BASE.to_string(),
        }
    }

    pub fn with_base_urls(mut self, api_base: impl Into<String>, oembed_base: impl Into<String>) -> Self {
        self.api.base = api_base.into();
        self.oembed_base = oembed_base.into();
        self
    }

    async fn extract_item(&self, url: &CanonicalUrl, key: &str) -> Result<Extraction, ExtractError> {
        let video_id = url
            .query_param("v")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ExtractError::Parse("watch URL has no video id".to_string()))?;

        let body = self
            .api
            .get("videos", &[("part", "snippet"), ("id", video_id.as_str()), ("key", key)])
            .await?;
        let Some(item) = first_item(&body) else {
            tracing::info!(video_id = %video_id, "YouTube video not found");
            return Ok(Extraction::absent(Subtype::Item));
        };
        let snippet = item.get("snippet").cloned().unwrap_or(Value::Null);

        let mut extraction = Extraction::new(Subtype::Item);
        extraction.title = text(&snippet, "/title");
        extraction.description = text(&snippet, "/description");
        extraction.author_name = text(&snippet, "/channelTitle");
        extraction.username = extraction.author_name.clone();
        extraction.published_at = text(&snippet, "/publishedAt");
        extraction.external_id = video_id.clone();
        extraction.html = embed_html(&video_id);
        extraction.thumbnails = thumbnails_of(&snippet);

        let channel_id = text(&snippet, "/channelId");
        if !channel_id.is_empty() {
            extraction.author_url = format!("{}{}", CHANNEL_URL_PREFIX, channel_id);
            extraction.author_picture = self.channel_picture(&channel_id, key).await;
        }
        extraction.raw = Some(item.clone());
        Ok(extraction)
    }

    /// Best channel avatar. Missing avatars never fail the item.
    async fn channel_picture(&self, channel_id: &str, key: &str) -> String {
        match self
            .api
            .get("channels", &[("part", "snippet"), ("id", channel_id), ("key", key)])
            .await
        {
            Ok(body) => first_item(&body)
                .and_then(|item| item.get("snippet"))
                .map(thumbnails_of)
                .and_then(|t| crate::select_best(THUMBNAIL_LADDER, &t).map(|b| b.url.clone()))
                .unwrap_or_default(),
            Err(e) => {
                tracing::debug!(channel_id = %channel_id, error = %e, "Channel avatar unavailable");
                String::new()
            }
        }
    }

    async fn extract_channel(&self, url: &CanonicalUrl, key: &str) -> Result<Extraction, ExtractError> {
        let (param, value) = channel_lookup(url)
            .ok_or_else(|| ExtractError::Parse(format!("not a channel URL: {}", url.url)))?;

        let body = self
            .api
            .get(
                "channels",
                &[("part", "snippet,statistics"), (param, value.as_str()), ("key", key)],
            )
            .await?;
        let Some(item) = first_item(&body) else {
            tracing::info!(lookup = %value, "YouTube channel not found");
            return Ok(Extraction::absent(Subtype::Channel));
        };
        let snippet = item.get("snippet").cloned().unwrap_or(Value::Null);

        let mut extraction = Extraction::new(Subtype::Channel);
        extraction.title = text(&snippet, "/title");
        extraction.author_name = extraction.title.clone();
        extraction.description = text(&snippet, "/description");
        extraction.published_at = text(&snippet, "/publishedAt");
        extraction.external_id = text(item, "/id");
        extraction.author_url = url.url.clone();
        let custom = text(&snippet, "/customUrl");
        extraction.username = if custom.is_empty() {
            value.trim_start_matches('@').to_string()
        } else {
            custom.trim_start_matches('@').to_string()
        };
        extraction.thumbnails = thumbnails_of(&snippet);
        extraction.author_picture = crate::select_best(THUMBNAIL_LADDER, &extraction.thumbnails)
            .map(|t| t.url.clone())
            .unwrap_or_default();
        extraction.raw = Some(item.clone());
        Ok(extraction)
    }
}

#[async_trait]
impl Provider for YoutubeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Youtube
    }

    fn subtype_for(&self, url: &CanonicalUrl) -> Subtype {
        if url.path == "/watch" {
            Subtype::Item
        } else {
            Subtype::Channel
        }
    }

    #[tracing::instrument(skip(self, ctx), fields(url = %ctx.canonical.url, key_id = ?ctx.credential_id()))]
    async fn extract_metadata(&self, ctx: &FetchContext) -> Result<Extraction, ExtractError> {
        let key = ctx
            .google_api_key()
            .ok_or_else(|| ExtractError::MissingCredential(MISSING_API_KEY.to_string()))?;

        match self.subtype_for(&ctx.canonical) {
            Subtype::Item => self.extract_item(&ctx.canonical, key).await,
            _ => self.extract_channel(&ctx.canonical, key).await,
        }
    }

    async fn extract_oembed(
        &self,
        ctx: &FetchContext,
        _discovered: Option<&str>,
    ) -> Result<Option<Value>, ExtractError> {
        if self.subtype_for(&ctx.canonical) != Subtype::Item {
            return Ok(None);
        }
        let url = format!(
            "{}/oembed?format=json&url={}",
            self.oembed_base.trim_end_matches('/'),
            urlencoding::encode(&ctx.canonical.url)
        );
        fetch_oembed(&self.api.client, &url).await.map(Some)
    }

    fn thumbnail_ladder(&self) -> &'static [&'static str] {
        THUMBNAIL_LADDER
    }

    fn metrics_sources(&self, subtype: Subtype) -> &'static [&'static str] {
        match subtype {
            Subtype::Item => &["youtube"],
            _ => &[],
        }
    }
}

/// Video statistics as the `youtube` metrics source
pub struct YoutubeMetrics {
    api: DataApi,
}

impl YoutubeMetrics {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            api: DataApi {
                client,
                base: DEFAULT_API_BASE.to_string(),
            },
        }
    }

    pub fn with_base_url(mut self, api_base: impl Into<String>) -> Self {
        self.api.base = api_base.into();
        self
    }
}

#[async_trait]
impl MetricsFetcher for YoutubeMetrics {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn error_policy(&self) -> ErrorCodePolicy {
        METRICS_POLICY
    }

    async fn fetch(&self, request: &MetricsRequest) -> anyhow::Result<MetricsReply> {
        let key = request
            .credential
            .as_deref()
            .and_then(|c| c.google_api_key.as_deref())
            .filter(|k| !k.trim().is_empty())
            .context(MISSING_API_KEY)?;

        match self
            .api
            .get(
                "videos",
                &[("part", "statistics"), ("id", request.external_id.as_str()), ("key", key)],
            )
            .await
        {
            Ok(body) => match first_item(&body).and_then(|item| item.get("statistics")) {
                Some(statistics) => Ok(MetricsReply::Success(statistics.clone())),
                None => Ok(MetricsReply::Failure {
                    code: 404,
                    message: "Video not found".to_string(),
                    body,
                }),
            },
            Err(ExtractError::Api { code, message }) => Ok(MetricsReply::Failure {
                code,
                body: serde_json::json!({ "code": code, "message": message.clone() }),
                message,
            }),
            Err(ExtractError::Status { status }) => Ok(MetricsReply::Failure {
                code: i64::from(status),
                message: format!("HTTP {}", status),
                body: Value::Null,
            }),
            Err(e) => Err(anyhow::anyhow!("YouTube statistics request failed: {}", e)),
        }
    }
}
