use crate::traits::{Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process object store for development and tests
#[derive(Clone)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, (Vec<u8>, String)>>>,
    base_url: String,
}

impl MemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            base_url: base_url.into(),
        }
    }

    /// Content type recorded for `key`
    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().await.get(key).map(|(_, ct)| ct.clone())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("memory://")
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn write(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        self.objects
            .write()
            .await
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(self.public_url(key))
    }

    async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
