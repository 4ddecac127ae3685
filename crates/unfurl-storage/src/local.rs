use crate::traits::{Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for objects (e.g., "/var/lib/unfurl")
    /// * `base_url` - Base URL the directory is served from (e.g., "http://localhost:3200/files")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
        })
    }

    /// Convert a storage key to a filesystem path under the base directory.
    ///
    /// Only plain relative components are accepted, so a key can never
    /// resolve outside the storage directory.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') {
            return Err(StorageError::InvalidKey(format!(
                "Storage key '{}' contains invalid characters",
                key
            )));
        }

        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "Storage key '{}' resolves outside storage directory",
                key
            )));
        }

        Ok(self.base_path.join(relative))
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(&self, key: &str, data: Vec<u8>, _content_type: &str) -> StorageResult<String> {
        let path = self.key_to_path(key)?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        // Write to a sibling temp file and rename so readers never see a partial thumbnail.
        let tmp_path = path.with_extension("part");
        let mut file = fs::File::create(&tmp_path).await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to create file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write file {}: {}", tmp_path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file {}: {}", tmp_path.display(), e))
        })?;

        fs::rename(&tmp_path, &path).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to move file into {}: {}", path.display(), e))
        })?;

        let url = self.public_url(key);

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage write successful"
        );

        Ok(url)
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(key)?;

        match fs::read(&path).await {
            Ok(data) => {
                tracing::debug!(key = %key, size_bytes = data.len(), "Local storage read successful");
                Ok(data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::ReadFailed(format!(
                "Failed to read file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(key = %key, "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn storage() -> (TempDir, LocalStorage) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://localhost:3200/files/".to_string())
            .await
            .unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn write_then_read() {
        let (_dir, storage) = storage().await;
        let url = storage
            .write("medias/abc/picture.jpg", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:3200/files/medias/abc/picture.jpg");
        assert!(storage.exists("medias/abc/picture.jpg").await.unwrap());
        assert_eq!(storage.read("medias/abc/picture.jpg").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn write_replaces_existing_object() {
        let (_dir, storage) = storage().await;
        storage.write("medias/abc/picture.jpg", vec![1], "image/jpeg").await.unwrap();
        storage.write("medias/abc/picture.jpg", vec![9, 9], "image/jpeg").await.unwrap();
        assert_eq!(storage.read("medias/abc/picture.jpg").await.unwrap(), vec![9, 9]);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_dir, storage) = storage().await;
        let err = storage.read("medias/none/picture.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!storage.exists("medias/none/picture.jpg").await.unwrap());
        assert!(storage.delete("medias/none/picture.jpg").await.is_ok());
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let (_dir, storage) = storage().await;
        for key in ["../escape.jpg", "/etc/passwd", "./medias/x", ""] {
            let err = storage.write(key, vec![0], "image/jpeg").await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "accepted {}", key);
        }
    }

    #[tokio::test]
    async fn delete_removes_object() {
        let (_dir, storage) = storage().await;
        storage.write("medias/abc/picture.png", vec![1], "image/png").await.unwrap();
        storage.delete("medias/abc/picture.png").await.unwrap();
        assert!(!storage.exists("medias/abc/picture.png").await.unwrap());
        assert_eq!(storage.backend_type(), StorageBackend::Local);
    }
}
