//! URL canonicalization
//!
//! Maps a submitted URL to one canonical form and a stable identity so that
//! equivalent links (tracking parameters, short links, mobile hosts, host
//! casing, trailing slashes, fragments) share a cache entry.
//!
//! `canonicalize` is pure and idempotent: feeding its output back in yields
//! the same result.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::CoreError;

/// Query parameters that never change the resource a URL points at.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "igshid", "mc_cid", "mc_eid", "ref_src", "si", "feature",
];

const YOUTUBE_HOST: &str = "www.youtube.com";
const FACEBOOK_HOST: &str = "www.facebook.com";

/// A canonical URL and the identity derived from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalUrl {
    /// Canonical URL string
    pub url: String,
    /// Hex SHA-256 of `url`; primary cache key
    pub identity: String,
    /// Lower-cased host
    pub host: String,
    /// Path without the query string
    pub path: String,
    /// Remaining query string, if any
    pub query: Option<String>,
}

impl CanonicalUrl {
    /// Path plus query, used by providers to locate the resource.
    pub fn resource_path(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Non-empty path segments.
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Identity for an already-canonical URL string.
pub fn identity_for(canonical_url: &str) -> String {
    hex::encode(Sha256::digest(canonical_url.as_bytes()))
}

/// Canonicalize a URL.
///
/// Fails with [`CoreError::InvalidUrl`] when the input is not an absolute
/// http(s) URL with a host.
pub fn canonicalize(raw: &str) -> Result<CanonicalUrl, CoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidUrl("empty URL".to_string()));
    }

    let mut url =
        Url::parse(trimmed).map_err(|e| CoreError::InvalidUrl(format!("{}: {}", trimmed, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(CoreError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let host = match url.host_str() {
        Some(h) if !h.is_empty() => h.to_lowercase(),
        _ => return Err(CoreError::InvalidUrl(format!("{}: missing host", trimmed))),
    };

    url.set_fragment(None);
    // Credentials embedded in the URL are never part of the identity.
    let _ = url.set_username("");
    let _ = url.set_password(None);

    if host == "youtu.be" || host == "www.youtu.be" {
        url = expand_youtube_short_link(&url)?;
    } else if let Some(provider_host) = provider_host(&host) {
        set_provider_host(&mut url, provider_host)?;
    }

    let host = url.host_str().unwrap_or_default().to_lowercase();
    strip_trailing_slash(&mut url);
    let keep_only: Option<&[&str]> = if host == YOUTUBE_HOST && url.path() == "/watch" {
        Some(&["v"])
    } else {
        None
    };
    filter_query(&mut url, keep_only);

    let canonical = url.to_string();
    Ok(CanonicalUrl {
        identity: identity_for(&canonical),
        host,
        path: url.path().to_string(),
        query: url.query().map(str::to_string),
        url: canonical,
    })
}

fn provider_host(host: &str) -> Option<&'static str> {
    match host {
        "youtube.com" | "www.youtube.com" | "m.youtube.com" => Some(YOUTUBE_HOST),
        "facebook.com" | "www.facebook.com" | "m.facebook.com" | "fb.com" | "www.fb.com" => {
            Some(FACEBOOK_HOST)
        }
        _ => None,
    }
}

fn set_provider_host(url: &mut Url, host: &str) -> Result<(), CoreError> {
    url.set_scheme("https")
        .map_err(|_| CoreError::InvalidUrl(format!("{}: cannot switch to https", url)))?;
    url.set_host(Some(host))
        .map_err(|e| CoreError::InvalidUrl(format!("{}: {}", url, e)))?;
    url.set_port(None)
        .map_err(|_| CoreError::InvalidUrl(format!("{}: cannot drop port", url)))?;
    Ok(())
}

fn expand_youtube_short_link(url: &Url) -> Result<Url, CoreError> {
    let video_id = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CoreError::InvalidUrl(format!("{}: missing video id", url)))?;

    let mut expanded = Url::parse("https://www.youtube.com/watch")
        .map_err(|e| CoreError::InvalidUrl(e.to_string()))?;
    expanded.query_pairs_mut().append_pair("v", video_id);
    Ok(expanded)
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

fn filter_query(url: &mut Url, keep_only: Option<&[&str]>) {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .filter(|(key, _)| keep_only.map_or(true, |allowed| allowed.iter().any(|k| key == k)))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
}

fn strip_trailing_slash(url: &mut Url) {
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        url.set_path(if trimmed.is_empty() { "/" } else { trimmed });
    }
}
