//! Unfurl Core Library
//!
//! This crate provides the domain models, error types, configuration, URL
//! canonicalization and collaborator contracts shared by all unfurl components.

pub mod canonical;
pub mod config;
pub mod credentials;
pub mod error;
pub mod hooks;
pub mod models;
pub mod storage_types;
pub mod task_error;

// Re-export commonly used types
pub use canonical::{canonicalize, CanonicalUrl};
pub use config::{Config, ResolverConfig};
pub use credentials::{current_credential, current_credential_id, with_credential, ApiCredential};
pub use error::{CoreError, ErrorMetadata, LogLevel};
pub use hooks::{
    CachePurger, NoOpCachePurger, NoOpTelemetryReporter, NoOpWebhookNotifier, ReportContext,
    TelemetryReporter, WebhookNotifier,
};
pub use storage_types::StorageBackend;
pub use task_error::{TaskError, TaskResultExt};
