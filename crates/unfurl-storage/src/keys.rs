//! Shared key generation for storage backends.
//!
//! Key format: `medias/{identity}/picture.{ext}`.

use crate::traits::{StorageError, StorageResult};

const DEFAULT_EXTENSION: &str = "jpg";

/// Storage key of the thumbnail for a media identity.
pub fn picture_key(identity: &str, extension: &str) -> StorageResult<String> {
    if identity.is_empty() || !identity.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StorageError::InvalidKey(format!(
            "media identity '{}' is not a plain token",
            identity
        )));
    }
    let extension = if extension.is_empty() {
        DEFAULT_EXTENSION
    } else {
        extension
    };
    Ok(format!("medias/{}/picture.{}", identity, extension))
}

/// File extension for a downloaded image, from its content type first and
/// the source URL second. Falls back to `jpg`.
pub fn extension_for(content_type: Option<&str>, source_url: &str) -> &'static str {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_lowercase());

    match mime.as_deref() {
        Some("image/png") => return "png",
        Some("image/gif") => return "gif",
        Some("image/webp") => return "webp",
        Some("image/jpeg") | Some("image/jpg") => return "jpg",
        _ => {}
    }

    let path = source_url.split(['?', '#']).next().unwrap_or_default();
    let ext = path.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "png" => "png",
        "gif" => "gif",
        "webp" => "webp",
        _ => DEFAULT_EXTENSION,
    }
}
