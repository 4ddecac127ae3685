//! Storage abstraction trait
//!
//! This module defines the Storage trait that all object store backends implement.

use crate::StorageBackend;
use async_trait::async_trait;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Object store abstraction
///
/// Writes to an existing key replace the previous object, so re-resolving a
/// URL overwrites its thumbnail in place.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` at `key` and return its public URL
    async fn write(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String>;

    /// Read the object stored at `key`
    async fn read(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete the object stored at `key`; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check if an object exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Public URL an object at `key` is served from
    fn public_url(&self, key: &str) -> String;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
