//! Credential rotation
//!
//! Provider calls run with one configured credential active. An explicit id
//! pins the credential; otherwise the rotator hands out the credentials able
//! to serve the provider round-robin.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use unfurl_core::ApiCredential;

#[derive(Default)]
pub struct CredentialRotator {
    credentials: Vec<Arc<ApiCredential>>,
    cursors: Mutex<HashMap<String, usize>>,
}

fn non_blank(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Whether `credential` carries the secrets `provider` needs.
fn serves(credential: &ApiCredential, provider: &str) -> bool {
    match provider {
        "youtube" => non_blank(&credential.google_api_key),
        "facebook" => {
            non_blank(&credential.facebook_app_id) && non_blank(&credential.facebook_app_secret)
        }
        _ => true,
    }
}

impl CredentialRotator {
    pub fn new(credentials: impl IntoIterator<Item = ApiCredential>) -> Self {
        Self {
            credentials: credentials.into_iter().map(Arc::new).collect(),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Arc<ApiCredential>> {
        self.credentials.iter().find(|c| c.id == id).cloned()
    }

    /// Next credential able to serve `provider`.
    pub fn next_for(&self, provider: &str) -> Option<Arc<ApiCredential>> {
        let candidates: Vec<&Arc<ApiCredential>> = self
            .credentials
            .iter()
            .filter(|c| serves(c, provider))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        let cursor = cursors.entry(provider.to_string()).or_insert(0);
        let picked = candidates[*cursor % candidates.len()].clone();
        *cursor = cursor.wrapping_add(1);
        Some(picked)
    }

    /// Whether the credential named `id` exists and can serve `provider`.
    pub fn can_serve(&self, id: &str, provider: &str) -> bool {
        self.get(id).is_some_and(|c| serves(&c, provider))
    }

    /// The pinned credential when `id` names one able to serve `provider`,
    /// the next in rotation otherwise.
    pub fn resolve(&self, id: Option<&str>, provider: &str) -> Option<Arc<ApiCredential>> {
        let Some(id) = id else {
            return self.next_for(provider);
        };
        match self.get(id) {
            Some(credential) if serves(&credential, provider) => Some(credential),
            Some(_) => {
                tracing::warn!(key_id = %id, provider = %provider, "Credential cannot serve provider, rotating");
                self.next_for(provider)
            }
            None => {
                tracing::warn!(key_id = %id, provider = %provider, "Unknown credential id, rotating");
                self.next_for(provider)
            }
        }
    }

    /// Run `fut` with the credential named `id` active.
    pub async fn with_credential<F>(&self, id: Option<&str>, fut: F) -> F::Output
    where
        F: Future,
    {
        unfurl_core::with_credential(id.and_then(|id| self.get(id)), fut).await
    }
}
