//! Error types module
//!
//! `CoreError` covers failures raised by the pure parts of the crate (URL
//! canonicalization, configuration parsing). Higher layers define their own
//! enums and describe themselves to callers through [`ErrorMetadata`].

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like malformed input
    Debug,
    /// Warning level - for upstream failures that will be retried
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Describes how an error should be surfaced to a caller and to the logs.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "INVALID_URL")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same request later may succeed
    fn is_recoverable(&self) -> bool;

    /// Human-readable message placed in a record's `error` field
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ErrorMetadata for CoreError {
    fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidUrl(_) => "INVALID_URL",
            CoreError::Config(_) => "CONFIGURATION_ERROR",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }

    fn client_message(&self) -> String {
        match self {
            CoreError::InvalidUrl(msg) => format!("The URL is not valid: {}", msg),
            CoreError::Config(_) => "The service is misconfigured".to_string(),
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            CoreError::InvalidUrl(_) => LogLevel::Debug,
            CoreError::Config(_) => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_is_not_recoverable() {
        let err = CoreError::InvalidUrl("ftp://example.com".to_string());
        assert_eq!(err.error_code(), "INVALID_URL");
        assert!(!err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Debug);
        assert!(err.client_message().contains("ftp://example.com"));
    }

    #[test]
    fn config_error_hides_details() {
        let err = CoreError::Config("DATABASE_URL missing".to_string());
        assert_eq!(err.client_message(), "The service is misconfigured");
        assert_eq!(err.log_level(), LogLevel::Error);
    }
}
