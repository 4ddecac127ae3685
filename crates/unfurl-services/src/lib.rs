//! Unfurl Services Layer
//!
//! Business services on top of the stores and provider plugins: the metadata
//! resolver, the metrics-freshness scheduler, credential rotation and the
//! dispatch of queued tasks. [`AppState`] wires them from configuration.

pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod resolver;
pub mod single_flight;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use credentials::CredentialRotator;
pub use error::ResolveError;
pub use metrics::MetricsScheduler;
pub use resolver::{MediaResolver, ResolveOptions};
pub use single_flight::SingleFlight;
pub use state::AppState;
