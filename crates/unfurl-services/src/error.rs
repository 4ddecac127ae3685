//! Resolution errors

use unfurl_core::models::ProviderKind;
use unfurl_core::{CoreError, ErrorMetadata, LogLevel};
use unfurl_providers::ExtractError;

/// Failure of a resolution pass. Never cached.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Network trouble, unexpected status or unparseable upstream response
    #[error("Transient fetch failure: {0}")]
    TransientFetch(String),

    /// The provider rejected the request
    #[error("{message}")]
    Provider { message: String },

    #[error("No provider registered for {0}")]
    NoProvider(ProviderKind),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<CoreError> for ResolveError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidUrl(msg) => ResolveError::InvalidUrl(msg),
            other => ResolveError::Store(other.to_string()),
        }
    }
}

impl From<ExtractError> for ResolveError {
    fn from(err: ExtractError) -> Self {
        if err.is_provider_error() {
            ResolveError::Provider {
                message: err.to_string(),
            }
        } else {
            ResolveError::TransientFetch(err.to_string())
        }
    }
}

impl ResolveError {
    pub fn store(err: anyhow::Error) -> Self {
        ResolveError::Store(format!("{:#}", err))
    }
}

/// (error_code, is_recoverable, log_level)
fn resolve_error_static_metadata(err: &ResolveError) -> (&'static str, bool, LogLevel) {
    match err {
        ResolveError::InvalidUrl(_) => ("INVALID_URL", false, LogLevel::Debug),
        ResolveError::TransientFetch(_) => ("TRANSIENT_FETCH", true, LogLevel::Warn),
        ResolveError::Provider { .. } => ("PROVIDER_ERROR", false, LogLevel::Warn),
        ResolveError::NoProvider(_) => ("NO_PROVIDER", false, LogLevel::Error),
        ResolveError::Store(_) => ("STORE_ERROR", true, LogLevel::Error),
    }
}

impl ErrorMetadata for ResolveError {
    fn error_code(&self) -> &'static str {
        resolve_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        resolve_error_static_metadata(self).1
    }

    fn client_message(&self) -> String {
        match self {
            ResolveError::InvalidUrl(msg) => format!("The URL is not valid: {}", msg),
            ResolveError::TransientFetch(_) => {
                "The media could not be fetched right now, try again later".to_string()
            }
            ResolveError::Provider { message } => message.clone(),
            ResolveError::NoProvider(_) | ResolveError::Store(_) => {
                "Internal server error".to_string()
            }
        }
    }

    fn log_level(&self) -> LogLevel {
        resolve_error_static_metadata(self).2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_keep_their_message() {
        let err: ResolveError =
            ExtractError::MissingCredential("The request is missing a valid API key.".to_string())
                .into();
        assert_eq!(err.error_code(), "PROVIDER_ERROR");
        assert_eq!(err.client_message(), "The request is missing a valid API key.");
        assert!(!err.is_recoverable());

        let err: ResolveError = ExtractError::Api {
            code: 403,
            message: "quota".to_string(),
        }
        .into();
        assert_eq!(err.client_message(), "quota");
    }

    #[test]
    fn transport_errors_are_transient() {
        for source in [
            ExtractError::Network("reset".to_string()),
            ExtractError::Status { status: 503 },
            ExtractError::Parse("eof".to_string()),
        ] {
            let err: ResolveError = source.into();
            assert_eq!(err.error_code(), "TRANSIENT_FETCH");
            assert!(err.is_recoverable());
            assert_eq!(err.log_level(), LogLevel::Warn);
        }
    }

    #[test]
    fn invalid_url_comes_from_core() {
        let err: ResolveError = CoreError::InvalidUrl("ftp://x".to_string()).into();
        assert_eq!(err.error_code(), "INVALID_URL");
        assert!(err.client_message().contains("ftp://x"));
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ResolveError::store(anyhow::anyhow!("connection refused"));
        assert_eq!(err.client_message(), "Internal server error");
        assert!(err.to_string().contains("connection refused"));
    }
}
