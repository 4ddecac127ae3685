//! Test doubles for the services layer.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use unfurl_core::models::{MetricsPolicy, ProviderKind, Subtype};
use unfurl_core::{
    current_credential_id, ApiCredential, CachePurger, CanonicalUrl, ReportContext,
    TelemetryReporter, WebhookNotifier,
};
use unfurl_db::{InMemoryMediaCache, InMemoryPollStateStore, InMemoryTaskStore};
use unfurl_providers::{
    ErrorCodePolicy, ExtractError, Extraction, FetchContext, MetricsFetcher, MetricsReply,
    MetricsRequest, Provider, ProviderRegistry,
};
use unfurl_storage::MemoryStorage;
use unfurl_worker::{TaskQueue, TaskQueueConfig};

use crate::credentials::CredentialRotator;
use crate::metrics::MetricsScheduler;
use crate::resolver::MediaResolver;

/// Scripted provider call result
#[derive(Clone)]
pub enum Outcome<T> {
    Ok(T),
    Transient,
    Rejected(String),
}

impl<T: Clone> Outcome<T> {
    fn produce(&self) -> Result<T, ExtractError> {
        match self {
            Outcome::Ok(value) => Ok(value.clone()),
            Outcome::Transient => Err(ExtractError::Status { status: 503 }),
            Outcome::Rejected(message) => Err(ExtractError::Api {
                code: 403,
                message: message.clone(),
            }),
        }
    }
}

pub struct MockProvider {
    pub kind: ProviderKind,
    pub metadata: Mutex<Outcome<Extraction>>,
    pub oembed: Mutex<Outcome<Option<Value>>>,
    pub ladder: &'static [&'static str],
    pub sources: &'static [&'static str],
    pub delay: Duration,
    pub metadata_calls: AtomicUsize,
    pub oembed_calls: AtomicUsize,
    pub seen_credentials: Mutex<Vec<Option<String>>>,
}

impl MockProvider {
    pub fn new(extraction: Extraction) -> Self {
        Self {
            kind: ProviderKind::Oembed,
            metadata: Mutex::new(Outcome::Ok(extraction)),
            oembed: Mutex::new(Outcome::Ok(None)),
            ladder: &["default", "medium", "high", "standard", "maxres"],
            sources: &["facebook"],
            delay: Duration::ZERO,
            metadata_calls: AtomicUsize::new(0),
            oembed_calls: AtomicUsize::new(0),
            seen_credentials: Mutex::new(Vec::new()),
        }
    }

    pub fn set_metadata(&self, outcome: Outcome<Extraction>) {
        *self.metadata.lock().unwrap() = outcome;
    }

    pub fn set_oembed(&self, outcome: Outcome<Option<Value>>) {
        *self.oembed.lock().unwrap() = outcome;
    }

    pub fn fetches(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst) + self.oembed_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn subtype_for(&self, _url: &CanonicalUrl) -> Subtype {
        Subtype::Item
    }

    async fn extract_metadata(&self, ctx: &FetchContext) -> Result<Extraction, ExtractError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_credentials
            .lock()
            .unwrap()
            .push(ctx.credential_id().map(str::to_string));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self.metadata.lock().unwrap().clone();
        outcome.produce()
    }

    async fn extract_oembed(
        &self,
        _ctx: &FetchContext,
        _discovered: Option<&str>,
    ) -> Result<Option<Value>, ExtractError> {
        self.oembed_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.oembed.lock().unwrap().clone();
        outcome.produce()
    }

    fn thumbnail_ladder(&self) -> &'static [&'static str] {
        self.ladder
    }

    fn metrics_sources(&self, subtype: Subtype) -> &'static [&'static str] {
        match subtype {
            Subtype::Item => self.sources,
            _ => &[],
        }
    }
}

/// Scripted metrics reply
#[derive(Clone)]
pub enum Reply {
    Success(Value),
    Failure(i64),
    Error,
}

pub const TEST_POLICY: ErrorCodePolicy = ErrorCodePolicy {
    permanent: &[(10, "Requires Facebook page permissions"), (803, "The Facebook object ID is not correct or invalid")],
    rate_limited: &[4],
};

pub struct ScriptedFetcher {
    pub name: &'static str,
    pub replies: Mutex<VecDeque<Reply>>,
    pub calls: AtomicUsize,
    /// Active credential id observed inside each fetch
    pub scoped_credentials: Mutex<Vec<Option<String>>>,
}

impl ScriptedFetcher {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            replies: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            scoped_credentials: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsFetcher for ScriptedFetcher {
    fn name(&self) -> &'static str {
        self.name
    }

    fn error_policy(&self) -> ErrorCodePolicy {
        TEST_POLICY
    }

    async fn fetch(&self, _request: &MetricsRequest) -> anyhow::Result<MetricsReply> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.scoped_credentials
            .lock()
            .unwrap()
            .push(current_credential_id());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            None => Ok(MetricsReply::Success(json!({"share_count": call}))),
            Some(Reply::Success(value)) => Ok(MetricsReply::Success(value)),
            Some(Reply::Failure(code)) => Ok(MetricsReply::Failure {
                code,
                message: format!("error {}", code),
                body: json!({"error": {"code": code}}),
            }),
            Some(Reply::Error) => Err(anyhow::anyhow!("connection reset")),
        }
    }
}

#[derive(Default)]
pub struct RecordingWebhook {
    pub events: Mutex<Vec<(String, String, Value)>>,
}

#[async_trait]
impl WebhookNotifier for RecordingWebhook {
    async fn notify(&self, identity: &str, provider: &str, value: &Value) -> Result<(), String> {
        self.events
            .lock()
            .unwrap()
            .push((identity.to_string(), provider.to_string(), value.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    pub reports: Mutex<Vec<(String, ReportContext)>>,
}

impl RecordingTelemetry {
    pub fn messages(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(m, _)| m.clone())
            .collect()
    }
}

impl TelemetryReporter for RecordingTelemetry {
    fn report(&self, message: &str, context: &ReportContext) {
        self.reports
            .lock()
            .unwrap()
            .push((message.to_string(), context.clone()));
    }
}

#[derive(Default)]
pub struct RecordingPurger {
    pub urls: Mutex<Vec<String>>,
}

#[async_trait]
impl CachePurger for RecordingPurger {
    async fn purge(&self, url: &str) -> Result<(), String> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Resolver and scheduler wired to in-memory collaborators
pub struct Harness {
    pub provider: Arc<MockProvider>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub youtube_fetcher: Arc<ScriptedFetcher>,
    pub cache: InMemoryMediaCache,
    pub tasks: InMemoryTaskStore,
    pub polls: InMemoryPollStateStore,
    pub storage: MemoryStorage,
    pub webhook: Arc<RecordingWebhook>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub purger: Arc<RecordingPurger>,
    pub scheduler: Arc<MetricsScheduler>,
    pub resolver: MediaResolver,
}

pub const PUBLIC_BASE_URL: &str = "https://unfurl.test";

impl Harness {
    pub fn new(provider: MockProvider) -> Self {
        Self::with_credentials(provider, Vec::new())
    }

    pub fn with_credentials(provider: MockProvider, credentials: Vec<ApiCredential>) -> Self {
        let provider = Arc::new(provider);
        let fetcher = Arc::new(ScriptedFetcher::new("facebook"));
        let youtube_fetcher = Arc::new(ScriptedFetcher::new("youtube"));

        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        registry.register_metrics(fetcher.clone());
        registry.register_metrics(youtube_fetcher.clone());
        let registry = Arc::new(registry);

        let cache = InMemoryMediaCache::new();
        let tasks = InMemoryTaskStore::new();
        let polls = InMemoryPollStateStore::new();
        let storage = MemoryStorage::new("https://cdn.test/files");
        let webhook = Arc::new(RecordingWebhook::default());
        let telemetry = Arc::new(RecordingTelemetry::default());
        let purger = Arc::new(RecordingPurger::default());
        let credentials = Arc::new(CredentialRotator::new(credentials));

        let queue = TaskQueue::new_no_worker(Arc::new(tasks.clone()), TaskQueueConfig::default());
        let scheduler = Arc::new(MetricsScheduler::new(
            registry.clone(),
            Arc::new(cache.clone()),
            Arc::new(polls.clone()),
            queue,
            webhook.clone(),
            telemetry.clone(),
            credentials.clone(),
            MetricsPolicy::default(),
        ));

        let resolver = MediaResolver::new(
            registry,
            Arc::new(cache.clone()),
            Arc::new(storage.clone()),
            reqwest::Client::new(),
            purger.clone(),
            telemetry.clone(),
            credentials,
            scheduler.clone(),
            PUBLIC_BASE_URL,
        );

        Self {
            provider,
            fetcher,
            youtube_fetcher,
            cache,
            tasks,
            polls,
            storage,
            webhook,
            telemetry,
            purger,
            scheduler,
            resolver,
        }
    }
}

/// A populated item extraction with no thumbnails
pub fn item(title: &str) -> Extraction {
    let mut extraction = Extraction::new(Subtype::Item);
    extraction.title = title.to_string();
    extraction.description = "A description".to_string();
    extraction.author_name = "Author".to_string();
    extraction.author_url = "https://example.com/author".to_string();
    extraction.external_id = "ext-1".to_string();
    extraction.raw = Some(json!({"title": title}));
    extraction
}
