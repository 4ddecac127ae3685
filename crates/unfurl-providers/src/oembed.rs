//! Generic oEmbed provider and shared oEmbed helpers
//!
//! Pages that match no dedicated provider are read for Open Graph tags and,
//! when they advertise one, their JSON oEmbed endpoint.

use async_trait::async_trait;
use serde_json::{json, Value};

use unfurl_core::models::{ProviderKind, Subtype};
use unfurl_core::CanonicalUrl;

use crate::html::{fetch_page, parse_page};
use crate::provider::{ExtractError, Extraction, FetchContext, Provider, Thumbnail};

const THUMBNAIL_LADDER: &[&str] = &["oembed", "og"];

/// Fetch and decode a JSON oEmbed document.
pub async fn fetch_oembed(client: &reqwest::Client, url: &str) -> Result<Value, ExtractError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        tracing::debug!(url = %url, status = status.as_u16(), "oEmbed request rejected");
        return Err(ExtractError::Status {
            status: status.as_u16(),
        });
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| ExtractError::Parse(format!("oEmbed body: {}", e)))?;
    if !body.is_object() {
        return Err(ExtractError::Parse("oEmbed body is not an object".to_string()));
    }
    Ok(body)
}

/// Fill fields the metadata pass left empty from an oEmbed document.
pub fn apply_oembed(extraction: &mut Extraction, oembed: &Value) {
    let text = |key: &str| {
        oembed
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    for (field, key) in [
        (&mut extraction.title, "title"),
        (&mut extraction.author_name, "author_name"),
        (&mut extraction.author_url, "author_url"),
        (&mut extraction.html, "html"),
    ] {
        if field.is_empty() {
            if let Some(value) = text(key) {
                *field = value;
            }
        }
    }
}

pub struct OembedProvider {
    client: reqwest::Client,
}

impl OembedProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Provider for OembedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Oembed
    }

    fn subtype_for(&self, _url: &CanonicalUrl) -> Subtype {
        Subtype::Item
    }

    #[tracing::instrument(skip(self, ctx), fields(url = %ctx.canonical.url))]
    async fn extract_metadata(&self, ctx: &FetchContext) -> Result<Extraction, ExtractError> {
        let page = fetch_page(&self.client, &ctx.canonical.url).await?;
        match page.status {
            404 | 410 => return Ok(Extraction::absent(Subtype::Item)),
            200..=299 => {}
            status => return Err(ExtractError::Status { status }),
        }

        let meta = parse_page(&page.body, &ctx.canonical.url);
        let mut extraction = Extraction::new(Subtype::Item);
        extraction.title = meta.title.clone();
        extraction.description = meta.description.clone();
        extraction.author_name = if meta.author.is_empty() {
            meta.site_name.clone()
        } else {
            meta.author.clone()
        };
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
            "author": meta.author,
            "published_time": meta.published_time,
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

    fn metrics_sources(&self, subtype: Subtype) -> &'static [&'static str] {
        match subtype {
            Subtype::Item => &["facebook"],
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unfurl_core::canonicalize;

    fn ctx(url: &str) -> FetchContext {
        FetchContext::new(canonicalize(url).unwrap(), None)
    }

    #[tokio::test]
    async fn extracts_page_and_discovers_oembed() {
        let mut server = mockito::Server::new_async().await;
        let page = format!(
            r#"<html><head>
                <meta property="og:title" content="A post">
                <meta property="og:description" content="About things">
                <meta property="og:image" content="{0}/cover.jpg">
                <meta property="og:site_name" content="Example">
                <link type="application/json+oembed" href="{0}/oembed?format=json">
            </head></html>"#,
            server.url()
        );
        let _page = server
            .mock("GET", "/post")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(page)
            .create_async()
            .await;
        let _oembed = server
            .mock("GET", "/oembed?format=json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"type":"rich","html":"<iframe></iframe>","thumbnail_url":"https://cdn/x.png","author_name":"Writer"}"#)
            .create_async()
            .await;

        let provider = OembedProvider::new(reqwest::Client::new());
        let ctx = ctx(&format!("{}/post", server.url()));
        let extraction = provider.extract_metadata(&ctx).await.unwrap();
        assert!(!extraction.absent);
        assert_eq!(extraction.title, "A post");
        assert_eq!(extraction.author_name, "Example");
        assert_eq!(extraction.thumbnails[0].label, "og");

        let oembed = provider
            .extract_oembed(&ctx, extraction.oembed_url.as_deref())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(oembed["type"], "rich");

        let thumbnails = provider.list_thumbnails(&extraction, Some(&oembed));
        assert_eq!(thumbnails.len(), 2);
        let best = crate::select_best(provider.thumbnail_ladder(), &thumbnails).unwrap();
        assert_eq!(best.label, "og");
    }

    #[tokio::test]
    async fn gone_page_is_confirmed_absent() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/gone").with_status(410).create_async().await;
        let provider = OembedProvider::new(reqwest::Client::new());
        let extraction = provider
            .extract_metadata(&ctx(&format!("{}/gone", server.url())))
            .await
            .unwrap();
        assert!(extraction.absent);
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/busy").with_status(503).create_async().await;
        let provider = OembedProvider::new(reqwest::Client::new());
        let err = provider
            .extract_metadata(&ctx(&format!("{}/busy", server.url())))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Status { status: 503 }));
        assert!(!err.is_provider_error());
    }

    #[tokio::test]
    async fn no_discovered_link_means_no_oembed() {
        let provider = OembedProvider::new(reqwest::Client::new());
        let result = provider
            .extract_oembed(&ctx("https://example.com/a"), None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn apply_oembed_only_fills_gaps() {
        let mut extraction = Extraction::new(Subtype::Item);
        extraction.title = "Kept".to_string();
        apply_oembed(
            &mut extraction,
            &json!({"title": "Ignored", "author_name": "Filled", "html": "<div></div>"}),
        );
        assert_eq!(extraction.title, "Kept");
        assert_eq!(extraction.author_name, "Filled");
        assert_eq!(extraction.html, "<div></div>");
        assert!(extraction.author_url.is_empty());
    }
}
