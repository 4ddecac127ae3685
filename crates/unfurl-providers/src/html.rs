//! Page markup extraction: Open Graph tags, `<title>`, meta description and
//! oEmbed discovery links.

use scraper::{Html, Selector};
use url::Url;

use crate::provider::ExtractError;

/// Metadata read from a page head
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMeta {
    pub title: String,
    pub description: String,
    pub image: String,
    pub url: String,
    pub site_name: String,
    pub author: String,
    pub published_time: String,
    /// Absolute URL of the advertised JSON oEmbed endpoint
    pub oembed_url: Option<String>,
}

fn select_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    document
        .select(&sel)
        .filter_map(|e| e.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

fn meta_property(document: &Html, property: &str) -> Option<String> {
    select_attr(document, &format!("meta[property='{}']", property), "content")
}

fn meta_name(document: &Html, name: &str) -> Option<String> {
    select_attr(document, &format!("meta[name='{}']", name), "content")
}

fn title_tag(document: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    let title = document.select(&sel).next()?.text().collect::<String>();
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Parse a page. Relative image and oEmbed links resolve against `page_url`.
pub fn parse_page(body: &str, page_url: &str) -> PageMeta {
    let document = Html::parse_document(body);
    let base = Url::parse(page_url).ok();
    let absolute = |link: String| match base.as_ref().and_then(|b| b.join(&link).ok()) {
        Some(url) => url.to_string(),
        None => link,
    };

    PageMeta {
        title: meta_property(&document, "og:title")
            .or_else(|| meta_name(&document, "title"))
            .or_else(|| title_tag(&document))
            .unwrap_or_default(),
        description: meta_property(&document, "og:description")
            .or_else(|| meta_name(&document, "description"))
            .unwrap_or_default(),
        image: meta_property(&document, "og:image")
            .map(&absolute)
            .unwrap_or_default(),
        url: meta_property(&document, "og:url").unwrap_or_default(),
        site_name: meta_property(&document, "og:site_name").unwrap_or_default(),
        author: meta_name(&document, "author")
            .or_else(|| meta_property(&document, "article:author"))
            .unwrap_or_default(),
        published_time: meta_property(&document, "article:published_time").unwrap_or_default(),
        oembed_url: select_attr(
            &document,
            "link[type='application/json+oembed']",
            "href",
        )
        .map(&absolute),
    }
}

/// Fetched page body with its status
pub(crate) struct Page {
    pub status: u16,
    pub body: String,
}

pub(crate) async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<Page, ExtractError> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
        .send()
        .await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    tracing::debug!(url = %url, status, size_bytes = body.len(), "Fetched page");
    Ok(Page { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <title> Fallback title </title>
        <meta property="og:title" content="Open Graph title">
        <meta name="description" content="Plain description">
        <meta property="og:image" content="/images/cover.png">
        <meta property="og:url" content="https://example.com/post/1">
        <meta name="author" content="Jane Writer">
        <meta property="article:published_time" content="2026-01-02T03:04:05Z">
        <link rel="alternate" type="application/json+oembed" href="/oembed?url=https%3A%2F%2Fexample.com%2Fpost%2F1&amp;format=json">
    </head><body></body></html>"#;

    #[test]
    fn reads_open_graph_with_fallbacks() {
        let meta = parse_page(PAGE, "https://example.com/post/1");
        assert_eq!(meta.title, "Open Graph title");
        assert_eq!(meta.description, "Plain description");
        assert_eq!(meta.image, "https://example.com/images/cover.png");
        assert_eq!(meta.url, "https://example.com/post/1");
        assert_eq!(meta.author, "Jane Writer");
        assert_eq!(meta.published_time, "2026-01-02T03:04:05Z");
        assert_eq!(
            meta.oembed_url.as_deref(),
            Some("https://example.com/oembed?url=https%3A%2F%2Fexample.com%2Fpost%2F1&format=json")
        );
    }

    #[test]
    fn title_tag_used_without_open_graph() {
        let meta = parse_page(
            "<html><head><title>Only a title</title></head></html>",
            "https://example.com/",
        );
        assert_eq!(meta.title, "Only a title");
        assert!(meta.image.is_empty());
        assert!(meta.oembed_url.is_none());
    }

    #[test]
    fn empty_meta_content_is_ignored() {
        let meta = parse_page(
            r#"<meta property="og:title" content=" "><title>Real</title>"#,
            "https://example.com/",
        );
        assert_eq!(meta.title, "Real");
    }
}
