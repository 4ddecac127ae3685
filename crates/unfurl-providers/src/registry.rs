//! Provider registry
//!
//! URLs are matched against an ordered list of host and path-prefix rules.
//! The first matching rule wins; a URL no rule claims goes to the generic
//! oEmbed provider.

use std::collections::HashMap;
use std::sync::Arc;

use unfurl_core::models::ProviderKind;
use unfurl_core::CanonicalUrl;

use crate::facebook::{FacebookMetrics, FacebookProvider};
use crate::oembed::OembedProvider;
use crate::provider::{MetricsFetcher, Provider};
use crate::youtube::{YoutubeMetrics, YoutubeProvider};

/// Dispatch rule: a provider claims URLs on `hosts` whose path starts with
/// one of `path_prefixes`.
#[derive(Debug, Clone)]
pub struct ProviderRule {
    pub kind: ProviderKind,
    pub hosts: Vec<String>,
    pub path_prefixes: Vec<String>,
}

impl ProviderRule {
    pub fn new(kind: ProviderKind, hosts: &[&str], path_prefixes: &[&str]) -> Self {
        Self {
            kind,
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            path_prefixes: path_prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn matches(&self, url: &CanonicalUrl) -> bool {
        self.hosts.iter().any(|h| *h == url.host)
            && self.path_prefixes.iter().any(|p| url.path.starts_with(p.as_str()))
    }
}

/// Rules for the built-in providers, in match order.
pub fn default_rules() -> Vec<ProviderRule> {
    vec![
        ProviderRule::new(
            ProviderKind::Youtube,
            &["www.youtube.com"],
            &["/watch", "/channel/", "/user/", "/c/", "/@"],
        ),
        ProviderRule::new(ProviderKind::Facebook, &["www.facebook.com"], &["/"]),
    ]
}

/// Registered providers, dispatch rules and metrics sources
#[derive(Clone)]
pub struct ProviderRegistry {
    rules: Vec<ProviderRule>,
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
    fetchers: HashMap<&'static str, Arc<dyn MetricsFetcher>>,
}

impl ProviderRegistry {
    /// Empty registry with the built-in dispatch rules.
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
            providers: HashMap::new(),
            fetchers: HashMap::new(),
        }
    }

    /// Registry with every built-in provider and metrics source.
    pub fn with_defaults(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(YoutubeProvider::new(client.clone())));
        registry.register(Arc::new(FacebookProvider::new(client.clone())));
        registry.register(Arc::new(OembedProvider::new(client.clone())));
        registry.register_metrics(Arc::new(YoutubeMetrics::new(client.clone())));
        registry.register_metrics(Arc::new(FacebookMetrics::new(client)));
        registry
    }

    pub fn with_rules(mut self, rules: Vec<ProviderRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Register a provider, replacing any provider of the same kind.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn register_metrics(&mut self, fetcher: Arc<dyn MetricsFetcher>) {
        self.fetchers.insert(fetcher.name(), fetcher);
    }

    /// Kind that handles `url`.
    pub fn select_kind(&self, url: &CanonicalUrl) -> ProviderKind {
        self.rules
            .iter()
            .find(|rule| rule.matches(url))
            .map(|rule| rule.kind)
            .unwrap_or(ProviderKind::Oembed)
    }

    /// Provider that handles `url`. `None` only when the selected kind was
    /// never registered.
    pub fn select(&self, url: &CanonicalUrl) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.select_kind(url)).cloned()
    }

    pub fn metrics_fetcher(&self, name: &str) -> Option<Arc<dyn MetricsFetcher>> {
        self.fetchers.get(name).cloned()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unfurl_core::canonicalize;
    use unfurl_core::models::Subtype;

    fn kind_of(registry: &ProviderRegistry, url: &str) -> ProviderKind {
        registry.select_kind(&canonicalize(url).unwrap())
    }

    #[test]
    fn dispatches_by_host_and_path() {
        let registry = ProviderRegistry::with_defaults(reqwest::Client::new());
        assert_eq!(kind_of(&registry, "https://youtu.be/abc"), ProviderKind::Youtube);
        assert_eq!(
            kind_of(&registry, "https://www.youtube.com/channel/UCaisXKBdNOYqGr2qOXCLchQ"),
            ProviderKind::Youtube
        );
        assert_eq!(
            kind_of(&registry, "https://youtube.com/user/portadosfundos/"),
            ProviderKind::Youtube
        );
        assert_eq!(kind_of(&registry, "https://www.youtube.com/@handle"), ProviderKind::Youtube);
        assert_eq!(
            kind_of(&registry, "https://m.facebook.com/nytimes/posts/1"),
            ProviderKind::Facebook
        );
    }

    #[test]
    fn unclaimed_urls_fall_back_to_oembed() {
        let registry = ProviderRegistry::with_defaults(reqwest::Client::new());
        assert_eq!(
            kind_of(&registry, "https://www.youtube.com/playlist?list=PL1"),
            ProviderKind::Oembed
        );
        assert_eq!(kind_of(&registry, "https://blog.example.com/post"), ProviderKind::Oembed);

        let provider = registry
            .select(&canonicalize("https://blog.example.com/post").unwrap())
            .unwrap();
        assert_eq!(provider.kind(), ProviderKind::Oembed);
        assert_eq!(provider.metrics_sources(Subtype::Item), &["facebook"]);
    }

    #[test]
    fn first_matching_rule_wins() {
        let registry = ProviderRegistry::with_defaults(reqwest::Client::new()).with_rules(vec![
            ProviderRule::new(ProviderKind::Facebook, &["www.youtube.com"], &["/watch"]),
            ProviderRule::new(ProviderKind::Youtube, &["www.youtube.com"], &["/"]),
        ]);
        assert_eq!(
            kind_of(&registry, "https://www.youtube.com/watch?v=x"),
            ProviderKind::Facebook
        );
    }

    #[test]
    fn metrics_sources_are_registered_by_name() {
        let registry = ProviderRegistry::with_defaults(reqwest::Client::new());
        assert_eq!(registry.metrics_fetcher("youtube").unwrap().name(), "youtube");
        assert_eq!(registry.metrics_fetcher("facebook").unwrap().name(), "facebook");
        assert!(registry.metrics_fetcher("twitter").is_none());
    }

    #[test]
    fn empty_registry_selects_nothing() {
        let registry = ProviderRegistry::new();
        assert!(registry
            .select(&canonicalize("https://example.com").unwrap())
            .is_none());
    }
}
