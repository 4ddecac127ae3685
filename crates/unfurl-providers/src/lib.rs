//! Unfurl Providers
//!
//! Provider plugins turn a canonical URL into normalized metadata. Each plugin
//! implements metadata extraction, optional oEmbed extraction, thumbnail
//! enumeration and names the metrics sources that apply to its media. The
//! registry dispatches URLs to plugins with ordered host and path rules.

pub mod facebook;
pub mod html;
pub mod oembed;
pub mod provider;
pub mod registry;
pub mod thumbnails;
pub mod youtube;

pub use facebook::{FacebookMetrics, FacebookProvider};
pub use oembed::{apply_oembed, OembedProvider};
pub use provider::{
    ErrorClass, ErrorCodePolicy, ExtractError, Extraction, FetchContext, MetricsFetcher,
    MetricsReply, MetricsRequest, Provider, Thumbnail,
};
pub use registry::{ProviderRegistry, ProviderRule};
pub use thumbnails::select_best;
pub use youtube::{YoutubeMetrics, YoutubeProvider};
