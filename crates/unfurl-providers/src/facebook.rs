//! Facebook provider: page markup for posts and pages, Graph API engagement
//! as the `facebook` metrics source.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

use unfurl_core::models::{ProviderKind, Subtype};
use unfurl_core::CanonicalUrl;

use crate::html::{fetch_page, parse_page};
use crate::oembed::fetch_oembed;
use crate::provider::{
    api_error, facebook_app_of, ErrorCodePolicy, ExtractError, Extraction, FetchContext,
    MetricsFetcher, MetricsReply, MetricsRequest, Provider, Thumbnail,
};

const DEFAULT_PAGE_BASE: &str = "https://www.facebook.com";
const DEFAULT_GRAPH_BASE: &str = "https://graph.facebook.com";

const THUMBNAIL_LADDER: &[&str] = &["og"];

/// Path fragments that identify a single post rather than a page
const ITEM_MARKERS: &[&str] = &[
    "/posts/",
    "/videos/",
    "/photos/",
    "/permalink.php",
    "/story.php",
    "/watch",
];

const METRICS_POLICY: ErrorCodePolicy = ErrorCodePolicy {
    permanent: &[
        (10, "Requires Facebook page permissions"),
        (
            100,
            "Unsupported get request. Facebook object ID does not support this operation",
        ),
        (803, "The Facebook object ID is not correct or invalid"),
    ],
    // Application request limit reached
    rate_limited: &[4],
};

fn username_of(url: &CanonicalUrl) -> String {
    url.segments()
        .first()
        .filter(|s| !s.ends_with(".php") && *s != &"watch")
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn post_id_of(url: &CanonicalUrl) -> String {
    if let Some(id) = url.query_param("story_fbid").or_else(|| url.query_param("v")) {
        return id;
    }
    url.segments()
        .iter()
        .rev()
        .find(|s| s.chars().all(|c| c.is_ascii_digit()))
        .map(|s| s.to_string())
        .unwrap_or_default()
}

pub fn embed_html(canonical_url: &str) -> String {
    format!(
        "<iframe src=\"https://www.facebook.com/plugins/post.php?href={}\" width=\"500\" \
         height=\"600\" style=\"border:none;overflow:hidden\" scrolling=\"no\" frameborder=\"0\" \
         allowfullscreen=\"true\"></iframe>",
        urlencoding::encode(canonical_url)
    )
}

pub struct FacebookProvider {
    client: reqwest::Client,
    page_base: String,
}

impl FacebookProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            page_base: DEFAULT_PAGE_BASE.to_string(),
        }
    }

    /// Fetch pages from `page_base` instead of www.facebook.com.
    pub fn with_base_url(mut self, page_base: impl Into<String>) -> Self {
        self.page_base = page_base.into();
        self
    }
}

#[async_trait]
impl Provider for FacebookProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Facebook
    }

    fn subtype_for(&self, url: &CanonicalUrl) -> Subtype {
        if ITEM_MARKERS.iter().any(|m| url.path.contains(m)) {
            Subtype::Item
        } else {
            Subtype::Page
        }
    }

    #[tracing::instrument(skip(self, ctx), fields(url = %ctx.canonical.url))]
    async fn extract_metadata(&self, ctx: &FetchContext) -> Result<Extraction, ExtractError> {
        let canonical = &ctx.canonical;
        let subtype = self.subtype_for(canonical);
        let page_url = format!(
            "{}{}",
            self.page_base.trim_end_matches('/'),
            canonical.resource_path()
        );

        let page = fetch_page(&self.client, &page_url).await?;
        match page.status {
            404 => return Ok(Extraction::absent(subtype)),
            200..=299 => {}
            status => return Err(ExtractError::Status { status }),
        }

        let meta = parse_page(&page.body, &page_url);
        let username = username_of(canonical);

        let mut extraction = Extraction::new(subtype);
        extraction.title = meta.title.clone();
        extraction.description = meta.description.clone();
        extraction.username = username.clone();
        if !username.is_empty() {
            extraction.author_url = format!("{}/{}", DEFAULT_PAGE_BASE, username);
        }
        match subtype {
            Subtype::Page => {
                extraction.author_name = meta.title.clone();
                extraction.external_id = username;
                extraction.author_picture = meta.image.clone();
            }
            _ => {
                extraction.author_name = if meta.author.is_empty() {
                    username
                } else {
                    meta.author.clone()
                };
                extraction.external_id = post_id_of(canonical);
                extraction.html = embed_html(&canonical.url);
            }
        }
        extraction.published_at = meta.published_time.clone();
        if !meta.image.is_empty() {
            extraction.thumbnails.push(Thumbnail::new("og", meta.image.clone()));
        }
        extraction.oembed_url = meta.oembed_url.clone();
        extraction.raw = Some(json!({
            "title": meta.title,
            "description": meta.description,
            "image": meta.image,
            "url": meta.url,
            "site_name": meta.site_name,
        }));
        Ok(extraction)
    }

    async fn extract_oembed(
        &self,
        _ctx: &FetchContext,
        discovered: Option<&str>,
    ) -> Result<Option<Value>, ExtractError> {
        match discovered {
            Some(url) => fetch_oembed(&self.client, url).await.map(Some),
            None => Ok(None),
        }
    }

    fn thumbnail_ladder(&self) -> &'static [&'static str] {
        THUMBNAIL_LADDER
    }

    fn metrics_sources(&self, _subtype: Subtype) -> &'static [&'static str] {
        &["facebook"]
    }
}

/// Graph API engagement as the `facebook` metrics source
pub struct FacebookMetrics {
    client: reqwest::Client,
    graph_base: String,
}

impl FacebookMetrics {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            graph_base: DEFAULT_GRAPH_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, graph_base: impl Into<String>) -> Self {
        self.graph_base = graph_base.into();
        self
    }

    /// Decode a Graph response: the JSON body on success, a failure reply
    /// carrying the Graph error code otherwise.
    async fn read(response: reqwest::Response) -> anyhow::Result<Result<Value, MetricsReply>> {
        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read Facebook Graph response")?;

        if status.is_success() {
            let body: Value =
                serde_json::from_str(&text).context("Failed to parse Facebook Graph response")?;
            return Ok(Ok(body));
        }

        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        let (code, message) = api_error(&body)
            .unwrap_or_else(|| (i64::from(status.as_u16()), status.to_string()));
        Ok(Err(MetricsReply::Failure {
            code,
            message,
            body,
        }))
    }
}

#[async_trait]
impl MetricsFetcher for FacebookMetrics {
    fn name(&self) -> &'static str {
        "facebook"
    }

    fn error_policy(&self) -> ErrorCodePolicy {
        METRICS_POLICY
    }

    async fn fetch(&self, request: &MetricsRequest) -> anyhow::Result<MetricsReply> {
        let (app_id, app_secret) = facebook_app_of(request.credential.as_deref())
            .context("Facebook app credentials are not configured")?;
        let base = self.graph_base.trim_end_matches('/');

        let response = self
            .client
            .get(format!("{}/oauth/access_token", base))
            .query(&[
                ("client_id", app_id),
                ("client_secret", app_secret),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .context("Facebook access token request failed")?;
        let token = match Self::read(response).await? {
            Ok(body) => body
                .get("access_token")
                .and_then(Value::as_str)
                .map(str::to_string)
                .context("Facebook token response has no access_token")?,
            Err(failure) => return Ok(failure),
        };

        let response = self
            .client
            .get(format!("{}/", base))
            .query(&[
                ("id", request.url.as_str()),
                ("fields", "engagement"),
                ("access_token", token.as_str()),
            ])
            .send()
            .await
            .context("Facebook engagement request failed")?;

        match Self::read(response).await? {
            Ok(body) => Ok(MetricsReply::Success(
                body.get("engagement").cloned().unwrap_or(Value::Null),
            )),
            Err(failure) => Ok(failure),
        }
    }
}
