use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Provider families a URL can be dispatched to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Youtube,
    Facebook,
    /// Generic oEmbed / page-markup fallback
    Oembed,
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProviderKind::Youtube => write!(f, "youtube"),
            ProviderKind::Facebook => write!(f, "facebook"),
            ProviderKind::Oembed => write!(f, "oembed"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "youtube" => Ok(ProviderKind::Youtube),
            "facebook" => Ok(ProviderKind::Facebook),
            "oembed" => Ok(ProviderKind::Oembed),
            _ => Err(anyhow::anyhow!("Invalid provider: {}", s)),
        }
    }
}

/// Kind of resource within a provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Subtype {
    /// A single post or video
    Item,
    /// A profile, user or channel
    Channel,
    /// Any other web page
    Page,
}

impl Display for Subtype {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Subtype::Item => write!(f, "item"),
            Subtype::Channel => write!(f, "channel"),
            Subtype::Page => write!(f, "page"),
        }
    }
}

impl FromStr for Subtype {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(Subtype::Item),
            "channel" => Ok(Subtype::Channel),
            "page" => Ok(Subtype::Page),
            _ => Err(anyhow::anyhow!("Invalid subtype: {}", s)),
        }
    }
}

/// Untouched provider responses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponses {
    pub api: Option<Value>,
    pub oembed: Option<Value>,
}

/// Failure description carried by a record returned for a failed resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub code: String,
    pub message: String,
}

/// Normalized metadata for one canonical URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub identity: String,
    pub canonical_url: String,
    pub provider: ProviderKind,
    pub subtype: Subtype,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_url: String,
    #[serde(default)]
    pub author_picture: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub external_id: String,
    /// Embed markup
    #[serde(default)]
    pub html: String,
    /// Public URL of the stored thumbnail
    #[serde(default)]
    pub picture: String,
    #[serde(default)]
    pub raw: RawResponses,
    /// Latest metrics value per metrics provider
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
    pub resolved_at: DateTime<Utc>,
}

impl MediaRecord {
    pub fn new(
        identity: impl Into<String>,
        canonical_url: impl Into<String>,
        provider: ProviderKind,
        subtype: Subtype,
    ) -> Self {
        Self {
            identity: identity.into(),
            canonical_url: canonical_url.into(),
            provider,
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
            picture: String::new(),
            raw: RawResponses::default(),
            metrics: BTreeMap::new(),
            error: None,
            resolved_at: Utc::now(),
        }
    }

    /// Clear everything the provider no longer confirms. Identity fields,
    /// `external_id` and metrics survive.
    pub fn clear_content(&mut self) {
        self.title.clear();
        self.author_name.clear();
        self.author_url.clear();
        self.author_picture.clear();
        self.description.clear();
        self.published_at.clear();
        self.html.clear();
        self.picture.clear();
        self.raw.oembed = None;
        self.error = None;
    }

    /// Whether a reader would see a difference between the two records.
    /// Ignores `resolved_at`, raw responses and metrics.
    pub fn same_visible_content(&self, other: &MediaRecord) -> bool {
        self.title == other.title
            && self.author_name == other.author_name
            && self.author_url == other.author_url
            && self.author_picture == other.author_picture
            && self.username == other.username
            && self.description == other.description
            && self.published_at == other.published_at
            && self.html == other.html
            && self.picture == other.picture
            && self.subtype == other.subtype
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn populated() -> MediaRecord {
        let mut record = MediaRecord::new("id", "https://example.com/a", ProviderKind::Oembed, Subtype::Page);
        record.title = "A title".to_string();
        record.description = "About".to_string();
        record.picture = "http://cdn/medias/id/picture.jpg".to_string();
        record.author_url = "https://example.com/me".to_string();
        record.html = "<iframe></iframe>".to_string();
        record.external_id = "42".to_string();
        record.raw.oembed = Some(json!({"title": "A title"}));
        record.metrics.insert("facebook".to_string(), json!({"share_count": 1}));
        record
    }

    #[test]
    fn clear_content_keeps_identity_and_metrics() {
        let mut record = populated();
        record.clear_content();
        assert!(record.title.is_empty());
        assert!(record.description.is_empty());
        assert!(record.picture.is_empty());
        assert!(record.author_url.is_empty());
        assert!(record.html.is_empty());
        assert!(record.raw.oembed.is_none());
        assert!(record.error.is_none());
        assert_eq!(record.external_id, "42");
        assert!(record.metrics.contains_key("facebook"));
    }

    #[test]
    fn visible_content_ignores_timestamps_and_metrics() {
        let a = populated();
        let mut b = a.clone();
        b.resolved_at = Utc::now() + chrono::Duration::hours(1);
        b.metrics.clear();
        assert!(a.same_visible_content(&b));
        b.title = "Changed".to_string();
        assert!(!a.same_visible_content(&b));
    }

    #[test]
    fn serializes_enums_in_snake_case() {
        let record = populated();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["provider"], "oembed");
        assert_eq!(value["subtype"], "page");
        assert!(value.get("error").is_none());
        let back: MediaRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn provider_kind_round_trips_through_strings() {
        for kind in [ProviderKind::Youtube, ProviderKind::Facebook, ProviderKind::Oembed] {
            assert_eq!(kind.to_string().parse::<ProviderKind>().unwrap(), kind);
        }
        assert!("vimeo".parse::<ProviderKind>().is_err());
    }
}
