//! Unfurl Storage Library
//!
//! Object store abstraction used to persist media thumbnails, with a local
//! filesystem backend and an in-memory backend.
//!
//! # Storage key format
//!
//! Thumbnails live at `medias/{identity}/picture.{ext}`, where `identity` is
//! the hex identity of the canonical URL. Keys must not contain `..` or a
//! leading `/`; key generation is centralized in the `keys` module.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use keys::{extension_for, picture_key};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use traits::{Storage, StorageError, StorageResult};
pub use unfurl_core::StorageBackend;
