//! Unfurl Infrastructure Library
//!
//! Concrete collaborators for the resolver and the metrics scheduler:
//! - Telemetry initialization and the tracing-backed error reporter
//! - Signed webhook delivery of metrics updates
//! - Cloudflare edge cache purge

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "webhook")]
pub mod webhook;

#[cfg(feature = "purge")]
pub mod purge;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, TracingReporter};

#[cfg(feature = "webhook")]
pub use webhook::{WebhookEvent, WebhookService, WebhookServiceConfig};

#[cfg(feature = "purge")]
pub use purge::{CloudflareConfig, CloudflarePurger};
