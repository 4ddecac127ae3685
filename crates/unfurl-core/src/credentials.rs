//! API credentials and the task-scoped active credential
//!
//! A credential is made active for the duration of one future with
//! [`with_credential`]. The value lives in a tokio task-local, so concurrent
//! resolutions and metrics attempts never observe each other's credential, and
//! the outer value is back in place once the scoped future completes, fails or
//! is dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::Arc;

/// Provider-scoped secrets identified by `id`
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCredential {
    pub id: String,
    #[serde(default)]
    pub google_api_key: Option<String>,
    #[serde(default)]
    pub facebook_app_id: Option<String>,
    #[serde(default)]
    pub facebook_app_secret: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl ApiCredential {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_google_api_key(mut self, key: impl Into<String>) -> Self {
        self.google_api_key = Some(key.into());
        self
    }

    pub fn with_facebook_app(mut self, app_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.facebook_app_id = Some(app_id.into());
        self.facebook_app_secret = Some(secret.into());
        self
    }
}

// Secrets never reach the logs.
impl Debug for ApiCredential {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ApiCredential")
            .field("id", &self.id)
            .field("google_api_key", &self.google_api_key.as_ref().map(|_| "<redacted>"))
            .field("facebook_app_id", &self.facebook_app_id)
            .field(
                "facebook_app_secret",
                &self.facebook_app_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

tokio::task_local! {
    static ACTIVE_CREDENTIAL: Option<Arc<ApiCredential>>;
}

/// Run `fut` with `credential` as the active credential.
pub async fn with_credential<F>(credential: Option<Arc<ApiCredential>>, fut: F) -> F::Output
where
    F: Future,
{
    ACTIVE_CREDENTIAL.scope(credential, fut).await
}

/// The credential active in the current scope, if any.
pub fn current_credential() -> Option<Arc<ApiCredential>> {
    ACTIVE_CREDENTIAL.try_with(|c| c.clone()).ok().flatten()
}

/// Id of the active credential, for log and telemetry context.
pub fn current_credential_id() -> Option<String> {
    current_credential().map(|c| c.id.clone())
}
