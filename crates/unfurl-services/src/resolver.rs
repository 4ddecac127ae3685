//! Metadata resolver
//!
//! Turns a submitted URL into a cached [`MediaRecord`]. A cached record is
//! returned as is unless a refresh is forced; otherwise one resolution pass
//! per identity runs at a time, and concurrent callers reuse its result.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use unfurl_core::models::{MediaRecord, ProviderKind, RecordError, Subtype};
use unfurl_core::{
    canonicalize, with_credential, CachePurger, CanonicalUrl, ErrorMetadata, LogLevel,
    ReportContext, TelemetryReporter,
};
use unfurl_db::MediaCache;
use unfurl_providers::{
    apply_oembed, select_best, ExtractError, Extraction, FetchContext, Provider, ProviderRegistry,
    Thumbnail,
};
use unfurl_storage::{extension_for, picture_key, Storage};

use crate::credentials::CredentialRotator;
use crate::error::ResolveError;
use crate::metrics::MetricsScheduler;
use crate::single_flight::SingleFlight;

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Bypass the cache and run a new pass
    pub force: bool,
    /// Credential to use instead of the next one in rotation
    pub credential_id: Option<String>,
}

impl ResolveOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            credential_id: None,
        }
    }
}

/// Replace empty strings in `target` with the value in `previous`.
fn keep_non_empty(target: &mut String, previous: &str) {
    if target.is_empty() && !previous.is_empty() {
        *target = previous.to_string();
    }
}

/// Merge a fresh record over the cached one: non-empty values win, missing
/// raw responses keep the cached ones.
fn merge_over(mut fresh: MediaRecord, previous: &MediaRecord) -> MediaRecord {
    keep_non_empty(&mut fresh.title, &previous.title);
    keep_non_empty(&mut fresh.author_name, &previous.author_name);
    keep_non_empty(&mut fresh.author_url, &previous.author_url);
    keep_non_empty(&mut fresh.author_picture, &previous.author_picture);
    keep_non_empty(&mut fresh.username, &previous.username);
    keep_non_empty(&mut fresh.description, &previous.description);
    keep_non_empty(&mut fresh.published_at, &previous.published_at);
    keep_non_empty(&mut fresh.external_id, &previous.external_id);
    keep_non_empty(&mut fresh.html, &previous.html);
    keep_non_empty(&mut fresh.picture, &previous.picture);
    if fresh.raw.api.is_none() {
        fresh.raw.api = previous.raw.api.clone();
    }
    if fresh.raw.oembed.is_none() {
        fresh.raw.oembed = previous.raw.oembed.clone();
    }
    fresh.metrics = previous.metrics.clone();
    fresh
}

fn record_from(canonical: &CanonicalUrl, kind: ProviderKind, extraction: Extraction) -> MediaRecord {
    let mut record = MediaRecord::new(
        canonical.identity.clone(),
        canonical.url.clone(),
        kind,
        extraction.subtype,
    );
    record.title = extraction.title;
    record.author_name = extraction.author_name;
    record.author_url = extraction.author_url;
    record.author_picture = extraction.author_picture;
    record.username = extraction.username;
    record.description = extraction.description;
    record.published_at = extraction.published_at;
    record.external_id = extraction.external_id;
    record.html = extraction.html;
    record.raw.api = extraction.raw;
    record
}

pub struct MediaResolver {
    registry: Arc<ProviderRegistry>,
    cache: Arc<dyn MediaCache>,
    storage: Arc<dyn Storage>,
    http: reqwest::Client,
    purger: Arc<dyn CachePurger>,
    telemetry: Arc<dyn TelemetryReporter>,
    credentials: Arc<CredentialRotator>,
    metrics: Arc<MetricsScheduler>,
    flights: SingleFlight,
    public_base_url: String,
}

impl MediaResolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: Arc<dyn MediaCache>,
        storage: Arc<dyn Storage>,
        http: reqwest::Client,
        purger: Arc<dyn CachePurger>,
        telemetry: Arc<dyn TelemetryReporter>,
        credentials: Arc<CredentialRotator>,
        metrics: Arc<MetricsScheduler>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            cache,
            storage,
            http,
            purger,
            telemetry,
            credentials,
            metrics,
            flights: SingleFlight::new(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Edge URL under which the front end serves the record for `canonical_url`.
    pub fn purge_target(&self, canonical_url: &str) -> String {
        format!(
            "{}/medias?url={}",
            self.public_base_url.trim_end_matches('/'),
            urlencoding::encode(canonical_url)
        )
    }

    #[tracing::instrument(skip(self, options), fields(force = options.force))]
    pub async fn resolve(
        &self,
        url: &str,
        options: &ResolveOptions,
    ) -> Result<MediaRecord, ResolveError> {
        let started = Utc::now();
        let canonical = canonicalize(url)?;

        if !options.force {
            if let Some(record) = self.cached(&canonical.identity).await? {
                tracing::debug!(identity = %canonical.identity, "Cache hit");
                return Ok(record);
            }
        }

        let _flight = self.flights.lock(&canonical.identity).await;

        let previous = self.cached(&canonical.identity).await?;
        if let Some(record) = &previous {
            if !options.force || record.resolved_at >= started {
                tracing::debug!(identity = %canonical.identity, "Resolved by a concurrent pass");
                return Ok(record.clone());
            }
        }

        let kind = self.registry.select_kind(&canonical);
        let provider = self
            .registry
            .select(&canonical)
            .ok_or(ResolveError::NoProvider(kind))?;
        let credential = self
            .credentials
            .resolve(options.credential_id.as_deref(), &kind.to_string());
        let ctx = FetchContext::new(canonical.clone(), credential.clone());

        with_credential(credential, self.run_pass(provider, ctx, previous, started)).await
    }

    /// Like [`resolve`](Self::resolve), but failures come back as a record whose
    /// `error` carries the message for the caller.
    pub async fn resolve_to_record(&self, url: &str, options: &ResolveOptions) -> MediaRecord {
        match self.resolve(url, options).await {
            Ok(record) => record,
            Err(err) => {
                match err.log_level() {
                    LogLevel::Debug => tracing::debug!(url = %url, error = %err, "Resolution failed"),
                    LogLevel::Warn => tracing::warn!(url = %url, error = %err, "Resolution failed"),
                    LogLevel::Error => tracing::error!(url = %url, error = %err, "Resolution failed"),
                }

                let (identity, canonical_url, kind) = match canonicalize(url) {
                    Ok(canonical) => {
                        let kind = self.registry.select_kind(&canonical);
                        (canonical.identity, canonical.url, kind)
                    }
                    Err(_) => (String::new(), url.to_string(), ProviderKind::Oembed),
                };
                let mut record = MediaRecord::new(identity, canonical_url, kind, Subtype::Page);
                record.error = Some(RecordError {
                    code: err.error_code().to_string(),
                    message: err.client_message(),
                });
                record
            }
        }
    }

    async fn cached(&self, identity: &str) -> Result<Option<MediaRecord>, ResolveError> {
        self.cache.get(identity).await.map_err(ResolveError::store)
    }

    async fn run_pass(
        &self,
        provider: Arc<dyn Provider>,
        ctx: FetchContext,
        previous: Option<MediaRecord>,
        started: DateTime<Utc>,
    ) -> Result<MediaRecord, ResolveError> {
        let canonical = &ctx.canonical;
        let metadata = provider.extract_metadata(&ctx).await;

        if let Ok(extraction) = &metadata {
            if extraction.absent {
                return self.store_absent(canonical, provider.kind(), extraction, previous).await;
            }
        }

        let discovered = metadata
            .as_ref()
            .ok()
            .and_then(|e| e.oembed_url.clone());
        let oembed = match provider.extract_oembed(&ctx, discovered.as_deref()).await {
            Ok(oembed) => oembed,
            Err(e) => {
                tracing::warn!(url = %canonical.url, error = %e, "oEmbed extraction failed");
                None
            }
        };

        let mut extraction = match (metadata, &oembed) {
            (Ok(extraction), _) => extraction,
            (Err(e), Some(_)) => {
                tracing::warn!(url = %canonical.url, error = %e, "Metadata extraction failed, using oEmbed only");
                Extraction::new(provider.subtype_for(canonical))
            }
            (Err(e), None) => return Err(self.failed(canonical, e)),
        };
        if let Some(oembed) = &oembed {
            apply_oembed(&mut extraction, oembed);
        }

        let candidates = provider.list_thumbnails(&extraction, oembed.as_ref());
        let best = select_best(provider.thumbnail_ladder(), &candidates).cloned();

        let mut record = record_from(canonical, provider.kind(), extraction);
        record.raw.oembed = oembed;

        let mut picture_rewritten = false;
        if let Some(thumbnail) = best {
            match self.store_picture(&canonical.identity, &thumbnail).await {
                Ok(url) => {
                    record.picture = url;
                    picture_rewritten = true;
                }
                Err(e) => {
                    tracing::warn!(url = %canonical.url, thumbnail = %thumbnail.url, error = %e, "Thumbnail download failed");
                    self.telemetry.report(
                        &format!("Thumbnail download failed: {:#}", e),
                        &ReportContext::for_url(canonical.url.clone())
                            .key_id(ctx.credential_id().map(str::to_string))
                            .provider(provider.kind().to_string()),
                    );
                }
            }
        }

        let mut record = match &previous {
            Some(previous) => merge_over(record, previous),
            None => record,
        };
        record.resolved_at = Utc::now().max(started);

        self.cache
            .put(&record)
            .await
            .context("Failed to cache media record")
            .map_err(ResolveError::store)?;

        if let Some(previous) = &previous {
            if !previous.same_visible_content(&record) {
                self.purge(&self.purge_target(&record.canonical_url)).await;
            }
            if picture_rewritten && previous.picture == record.picture {
                self.purge(&record.picture).await;
            }
        }

        self.start_metrics(provider.as_ref(), &record, ctx.credential_id())
            .await;

        tracing::info!(
            identity = %record.identity,
            provider = %record.provider,
            subtype = %record.subtype,
            "Media resolved"
        );

        Ok(record)
    }

    async fn store_absent(
        &self,
        canonical: &CanonicalUrl,
        kind: ProviderKind,
        extraction: &Extraction,
        previous: Option<MediaRecord>,
    ) -> Result<MediaRecord, ResolveError> {
        let mut record = previous.clone().unwrap_or_else(|| {
            MediaRecord::new(
                canonical.identity.clone(),
                canonical.url.clone(),
                kind,
                extraction.subtype,
            )
        });
        record.clear_content();
        record.subtype = extraction.subtype;
        record.raw.api = extraction.raw.clone();
        record.resolved_at = Utc::now();

        self.cache
            .put(&record)
            .await
            .context("Failed to cache media record")
            .map_err(ResolveError::store)?;

        if let Some(previous) = &previous {
            if !previous.same_visible_content(&record) {
                self.purge(&self.purge_target(&record.canonical_url)).await;
            }
        }

        tracing::info!(identity = %record.identity, url = %record.canonical_url, "Media confirmed absent");
        Ok(record)
    }

    fn failed(&self, canonical: &CanonicalUrl, err: ExtractError) -> ResolveError {
        let err = ResolveError::from(err);
        tracing::warn!(url = %canonical.url, error = %err, "Resolution pass failed, cache untouched");
        err
    }

    async fn store_picture(&self, identity: &str, thumbnail: &Thumbnail) -> anyhow::Result<String> {
        let response = self
            .http
            .get(&thumbnail.url)
            .send()
            .await
            .context("Failed to request thumbnail")?
            .error_for_status()
            .context("Thumbnail request was rejected")?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .context("Failed to read thumbnail body")?;
        if bytes.is_empty() {
            anyhow::bail!("Thumbnail body is empty");
        }

        let extension = extension_for(content_type.as_deref(), &thumbnail.url);
        let key = picture_key(identity, extension)?;
        let content_type = content_type.unwrap_or_else(|| match extension {
            "jpg" => "image/jpeg".to_string(),
            other => format!("image/{}", other),
        });

        let url = self
            .storage
            .write(&key, bytes.to_vec(), &content_type)
            .await
            .with_context(|| format!("Failed to store thumbnail at {}", key))?;
        tracing::debug!(key = %key, label = %thumbnail.label, "Thumbnail stored");
        Ok(url)
    }

    async fn purge(&self, url: &str) {
        if let Err(e) = self.purger.purge(url).await {
            self.telemetry
                .report(&format!("Edge purge failed: {}", e), &ReportContext::for_url(url));
        }
    }

    async fn start_metrics(
        &self,
        provider: &dyn Provider,
        record: &MediaRecord,
        credential_id: Option<&str>,
    ) {
        for source in provider.metrics_sources(record.subtype) {
            let credential_id =
                credential_id.filter(|id| self.credentials.can_serve(id, source));
            if let Err(e) = self
                .metrics
                .start(
                    &record.identity,
                    source,
                    &record.canonical_url,
                    &record.external_id,
                    credential_id.map(str::to_string),
                )
                .await
            {
                tracing::error!(identity = %record.identity, provider = %source, error = %e, "Failed to start metrics polling");
                self.telemetry.report(
                    &format!("Failed to start metrics polling: {:#}", e),
                    &ReportContext::for_url(record.canonical_url.clone()).provider(*source),
                );
            }
        }
    }

    /// Latest cached value of one metrics source.
    pub async fn cached_metrics(&self, url: &str, provider: &str) -> Result<Option<Value>, ResolveError> {
        let canonical = canonicalize(url)?;
        Ok(self
            .cached(&canonical.identity)
            .await?
            .and_then(|record| record.metrics.get(provider).cloned()))
    }
}
