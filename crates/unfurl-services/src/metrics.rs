//! Metrics-freshness scheduler
//!
//! Each (identity, metrics source) pair is polled by a chain of
//! `metrics_poll` tasks. An attempt fetches the current value, writes it to the
//! cache, notifies the webhook and enqueues its successor, until the provider
//! reports a permanent error or the attempt budget is spent.
//!
//! ```text
//! Idle -> Fetching -> Scheduled    (success or other failure, +refresh, attempt + 1)
//!                  -> RateLimited  (rate-limit code, +rate_limit_delay, attempt unchanged)
//!                  -> Permanent    (permanent code, terminal)
//!                  -> Exhausted    (attempt budget reached, terminal)
//! ```

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use unfurl_core::models::{MetricsPolicy, MetricsPollPayload, MetricsPollState, PollPhase};
use unfurl_core::{with_credential, ReportContext, TelemetryReporter, WebhookNotifier};
use unfurl_db::{MediaCache, PollStateStore};
use unfurl_providers::{ErrorClass, MetricsReply, MetricsRequest, ProviderRegistry};
use unfurl_worker::TaskQueue;

use crate::credentials::CredentialRotator;

/// How one attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(Value),
    Permanent(&'static str),
    RateLimited,
    Failed,
}

/// Apply an attempt outcome to `state`. Returns the value to publish.
pub fn advance(
    state: &mut MetricsPollState,
    outcome: &AttemptOutcome,
    policy: &MetricsPolicy,
    now: DateTime<Utc>,
) -> Value {
    let value = match outcome {
        AttemptOutcome::Success(value) => {
            state.attempt_count += 1;
            state.phase = PollPhase::Scheduled;
            state.next_run_at = now + policy.refresh_interval;
            value.clone()
        }
        AttemptOutcome::Failed => {
            state.attempt_count += 1;
            state.phase = PollPhase::Scheduled;
            state.next_run_at = now + policy.refresh_interval;
            Value::Null
        }
        AttemptOutcome::RateLimited => {
            state.phase = PollPhase::RateLimited;
            state.next_run_at = now + policy.rate_limit_delay;
            Value::Null
        }
        AttemptOutcome::Permanent(_) => {
            state.attempt_count += 1;
            state.phase = PollPhase::Permanent;
            Value::Null
        }
    };

    if state.phase == PollPhase::Scheduled && state.attempt_count >= policy.max_attempts {
        state.phase = PollPhase::Exhausted;
    }

    state.last_value = Some(value.clone());
    state.updated_at = now;
    value
}

fn source_label(provider: &str) -> String {
    match provider {
        "youtube" => "YouTube".to_string(),
        "facebook" => "Facebook".to_string(),
        other => other.to_string(),
    }
}

pub struct MetricsScheduler {
    registry: Arc<ProviderRegistry>,
    cache: Arc<dyn MediaCache>,
    polls: Arc<dyn PollStateStore>,
    queue: TaskQueue,
    webhook: Arc<dyn WebhookNotifier>,
    telemetry: Arc<dyn TelemetryReporter>,
    credentials: Arc<CredentialRotator>,
    policy: MetricsPolicy,
}

impl MetricsScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: Arc<dyn MediaCache>,
        polls: Arc<dyn PollStateStore>,
        queue: TaskQueue,
        webhook: Arc<dyn WebhookNotifier>,
        telemetry: Arc<dyn TelemetryReporter>,
        credentials: Arc<CredentialRotator>,
        policy: MetricsPolicy,
    ) -> Self {
        Self {
            registry,
            cache,
            polls,
            queue,
            webhook,
            telemetry,
            credentials,
            policy,
        }
    }

    pub fn policy(&self) -> &MetricsPolicy {
        &self.policy
    }

    /// Begin polling `provider` for `identity`. Returns false when the pair
    /// already has a poll state, terminal or not.
    #[tracing::instrument(skip(self, url, external_id))]
    pub async fn start(
        &self,
        identity: &str,
        provider: &str,
        url: &str,
        external_id: &str,
        credential_id: Option<String>,
    ) -> anyhow::Result<bool> {
        let state =
            MetricsPollState::new(identity, provider, url, external_id, credential_id, Utc::now());

        let inserted = self
            .polls
            .insert_if_absent(&state)
            .await
            .context("Failed to create metrics poll state")?;
        if !inserted {
            tracing::debug!(identity = %identity, provider = %provider, "Metrics polling already started");
            return Ok(false);
        }

        self.enqueue(identity, provider, state.next_run_at).await?;
        tracing::info!(identity = %identity, provider = %provider, "Metrics polling started");
        Ok(true)
    }

    async fn enqueue(
        &self,
        identity: &str,
        provider: &str,
        run_at: DateTime<Utc>,
    ) -> anyhow::Result<Uuid> {
        let payload = MetricsPollPayload {
            identity: identity.to_string(),
            provider: provider.to_string(),
        };
        self.queue
            .submit(&payload, run_at)
            .await
            .context("Failed to enqueue metrics poll")
    }

    /// Run one attempt for the pair named by `payload`. Never fails; problems
    /// are reported to telemetry. Returns the state after the attempt, or
    /// `None` when no state could be loaded.
    #[tracing::instrument(skip(self), fields(identity = %payload.identity, provider = %payload.provider))]
    pub async fn run_attempt(&self, payload: &MetricsPollPayload) -> Option<MetricsPollState> {
        let mut state = match self.polls.get(&payload.identity, &payload.provider).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::warn!("No metrics poll state for task, dropping it");
                return None;
            }
            Err(e) => {
                self.report_store_failure("load poll state", &payload.identity, &payload.provider, &e);
                return None;
            }
        };

        if state.is_terminal() {
            tracing::debug!(phase = %state.phase, "Metrics polling already finished");
            return Some(state);
        }

        state.phase = PollPhase::Fetching;
        state.updated_at = Utc::now();
        if let Err(e) = self.polls.save(&state).await {
            self.report_store_failure("save poll state", &state.identity, &state.provider, &e);
        }

        let credential = self
            .credentials
            .resolve(state.credential_id.as_deref(), &state.provider);
        let key_id = credential.as_ref().map(|c| c.id.clone());
        let label = source_label(&state.provider);
        let (url, provider) = (state.url.clone(), state.provider.clone());
        let report_context = || {
            ReportContext::for_url(url.clone())
                .key_id(key_id.clone())
                .provider(provider.clone())
        };

        let outcome = match self.registry.metrics_fetcher(&state.provider) {
            None => {
                self.telemetry.report(
                    &format!("{} metrics: no metrics source registered", label),
                    &report_context(),
                );
                AttemptOutcome::Failed
            }
            Some(fetcher) => {
                let request = MetricsRequest {
                    url: state.url.clone(),
                    external_id: state.external_id.clone(),
                    credential: credential.clone(),
                };
                match with_credential(credential.clone(), fetcher.fetch(&request)).await {
                    Ok(MetricsReply::Success(value)) => AttemptOutcome::Success(value),
                    Ok(MetricsReply::Failure {
                        code,
                        message,
                        body,
                    }) => match fetcher.error_policy().classify(code) {
                        ErrorClass::Permanent(reason) => {
                            tracing::warn!(
                                url = %state.url,
                                key_id = ?key_id,
                                error = %body,
                                "{} metrics error: {}",
                                label,
                                reason
                            );
                            AttemptOutcome::Permanent(reason)
                        }
                        class => {
                            self.telemetry.report(
                                &format!("{} metrics: {}", label, message),
                                &report_context().error_code(code).error_body(body),
                            );
                            if class == ErrorClass::RateLimited {
                                AttemptOutcome::RateLimited
                            } else {
                                AttemptOutcome::Failed
                            }
                        }
                    },
                    Err(e) => {
                        self.telemetry
                            .report(&format!("{} metrics: {:#}", label, e), &report_context());
                        AttemptOutcome::Failed
                    }
                }
            }
        };

        let value = advance(&mut state, &outcome, &self.policy, Utc::now());
        // A rate-limited key is not reused by the next attempt
        state.credential_id = match outcome {
            AttemptOutcome::RateLimited => None,
            _ => key_id.clone().or(state.credential_id.take()),
        };

        match self
            .cache
            .update_metrics(&state.identity, &state.provider, &value)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!("No cached record to attach metrics to"),
            Err(e) => {
                self.report_store_failure("update metrics", &state.identity, &state.provider, &e)
            }
        }

        if let Err(e) = self
            .webhook
            .notify(&state.identity, &state.provider, &value)
            .await
        {
            self.telemetry.report(
                &format!("{} metrics: webhook failed: {}", label, e),
                &report_context(),
            );
        }

        if let Err(e) = self.polls.save(&state).await {
            self.report_store_failure("save poll state", &state.identity, &state.provider, &e);
        }

        if matches!(state.phase, PollPhase::Scheduled | PollPhase::RateLimited) {
            if let Err(e) = self
                .enqueue(&state.identity, &state.provider, state.next_run_at)
                .await
            {
                self.report_store_failure("enqueue successor", &state.identity, &state.provider, &e);
            }
        }

        tracing::info!(
            phase = %state.phase,
            attempt_count = state.attempt_count,
            next_run_at = %state.next_run_at,
            "Metrics attempt finished"
        );

        Some(state)
    }

    fn report_store_failure(&self, action: &str, identity: &str, provider: &str, err: &anyhow::Error) {
        tracing::error!(identity = %identity, provider = %provider, error = %err, "Metrics store failure: {}", action);
        self.telemetry.report(
            &format!("Metrics store failure ({}): {:#}", action, err),
            &ReportContext {
                provider: Some(provider.to_string()),
                ..Default::default()
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item, Harness, MockProvider, Reply};
    use chrono::Duration;
    use serde_json::json;
    use unfurl_core::models::{MediaRecord, ProviderKind, Subtype, TaskStatus, TaskType};
    use unfurl_core::ApiCredential;
    use unfurl_db::TaskStore;

    const IDENTITY: &str = "abc123";

    fn payload(provider: &str) -> MetricsPollPayload {
        MetricsPollPayload {
            identity: IDENTITY.to_string(),
            provider: provider.to_string(),
        }
    }

    async fn started(harness: &Harness) {
        let record = MediaRecord::new(IDENTITY, "https://example.com/a", ProviderKind::Oembed, Subtype::Item);
        harness.cache.put(&record).await.unwrap();
        assert!(harness
            .scheduler
            .start(IDENTITY, "facebook", "https://example.com/a", "", None)
            .await
            .unwrap());
    }

    async fn pending_polls(harness: &Harness) -> Vec<unfurl_core::models::Task> {
        harness
            .tasks
            .tasks()
            .await
            .into_iter()
            .filter(|t| t.task_type == TaskType::MetricsPoll)
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Scheduled))
            .collect()
    }

    #[test]
    fn advance_follows_the_state_machine() {
        let policy = MetricsPolicy::default();
        let now = Utc::now();
        let fresh = || MetricsPollState::new("id", "facebook", "https://x", "", None, now);

        let mut state = fresh();
        let value = advance(&mut state, &AttemptOutcome::Success(json!({"n": 1})), &policy, now);
        assert_eq!(value, json!({"n": 1}));
        assert_eq!(state.phase, PollPhase::Scheduled);
        assert_eq!(state.attempt_count, 1);
        assert_eq!(state.next_run_at, now + Duration::hours(24));

        let mut state = fresh();
        advance(&mut state, &AttemptOutcome::RateLimited, &policy, now);
        assert_eq!(state.phase, PollPhase::RateLimited);
        assert_eq!(state.attempt_count, 0);
        assert_eq!(state.next_run_at, now + Duration::hours(1));

        let mut state = fresh();
        let value = advance(&mut state, &AttemptOutcome::Permanent("gone"), &policy, now);
        assert_eq!(value, Value::Null);
        assert!(state.is_terminal());
        assert_eq!(state.attempt_count, 1);

        let mut state = fresh();
        advance(&mut state, &AttemptOutcome::Failed, &policy, now);
        assert_eq!(state.phase, PollPhase::Scheduled);
        assert_eq!(state.attempt_count, 1);
        assert_eq!(state.last_value, Some(Value::Null));
    }

    #[test]
    fn tenth_attempt_exhausts() {
        let policy = MetricsPolicy::default();
        let now = Utc::now();
        let mut state = MetricsPollState::new("id", "facebook", "https://x", "", None, now);
        state.attempt_count = 9;
        advance(&mut state, &AttemptOutcome::Success(json!({})), &policy, now);
        assert_eq!(state.attempt_count, 10);
        assert_eq!(state.phase, PollPhase::Exhausted);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_enqueues_once() {
        let harness = Harness::new(MockProvider::new(item("t")));
        started(&harness).await;

        assert!(!harness
            .scheduler
            .start(IDENTITY, "facebook", "https://example.com/a", "", None)
            .await
            .unwrap());

        let polls = pending_polls(&harness).await;
        assert_eq!(polls.len(), 1);
        assert!(polls[0].scheduled_at <= Utc::now());
    }

    #[tokio::test]
    async fn success_writes_once_notifies_once_and_reschedules() {
        let harness = Harness::new(MockProvider::new(item("t")));
        started(&harness).await;
        harness.fetcher.push(Reply::Success(json!({"share_count": 7})));

        let state = harness.scheduler.run_attempt(&payload("facebook")).await.unwrap();

        assert_eq!(state.phase, PollPhase::Scheduled);
        assert_eq!(state.attempt_count, 1);
        let record = harness.cache.get(IDENTITY).await.unwrap().unwrap();
        assert_eq!(record.metrics["facebook"], json!({"share_count": 7}));
        assert_eq!(
            *harness.webhook.events.lock().unwrap(),
            vec![(IDENTITY.to_string(), "facebook".to_string(), json!({"share_count": 7}))]
        );

        let polls = pending_polls(&harness).await;
        let successor = polls.iter().find(|t| t.scheduled_at > Utc::now()).unwrap();
        let delay = successor.scheduled_at - Utc::now();
        assert!(delay > Duration::hours(23) && delay <= Duration::hours(24));
    }

    #[tokio::test]
    async fn permanent_error_is_terminal_and_enqueues_nothing() {
        let harness = Harness::new(MockProvider::new(item("t")));
        started(&harness).await;
        harness.tasks.claim_next_task().await.unwrap();
        harness.fetcher.push(Reply::Failure(803));

        let state = harness.scheduler.run_attempt(&payload("facebook")).await.unwrap();

        assert_eq!(state.phase, PollPhase::Permanent);
        assert_eq!(state.attempt_count, 1);
        assert!(pending_polls(&harness).await.is_empty());
        let record = harness.cache.get(IDENTITY).await.unwrap().unwrap();
        assert_eq!(record.metrics["facebook"], Value::Null);
        assert_eq!(harness.webhook.events.lock().unwrap().len(), 1);
        assert!(harness.telemetry.messages().is_empty());

        let again = harness.scheduler.run_attempt(&payload("facebook")).await.unwrap();
        assert_eq!(again.phase, PollPhase::Permanent);
        assert_eq!(harness.fetcher.calls(), 1);
        assert_eq!(harness.webhook.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_waits_an_hour_without_counting() {
        let harness = Harness::new(MockProvider::new(item("t")));
        started(&harness).await;
        harness.tasks.claim_next_task().await.unwrap();
        harness.fetcher.push(Reply::Failure(4));

        let state = harness.scheduler.run_attempt(&payload("facebook")).await.unwrap();

        assert_eq!(state.phase, PollPhase::RateLimited);
        assert_eq!(state.attempt_count, 0);
        let polls = pending_polls(&harness).await;
        assert_eq!(polls.len(), 1);
        let delay = polls[0].scheduled_at - Utc::now();
        assert!(delay > Duration::minutes(59) && delay <= Duration::hours(1));

        let reports = harness.telemetry.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "Facebook metrics: error 4");
        assert_eq!(reports[0].1.error_code.as_deref(), Some("4"));
        assert_eq!(reports[0].1.url.as_deref(), Some("https://example.com/a"));
    }

    #[tokio::test]
    async fn other_failures_and_errors_count_and_reschedule() {
        let harness = Harness::new(MockProvider::new(item("t")));
        started(&harness).await;
        harness.fetcher.push(Reply::Failure(2));
        harness.fetcher.push(Reply::Error);

        let first = harness.scheduler.run_attempt(&payload("facebook")).await.unwrap();
        assert_eq!(first.phase, PollPhase::Scheduled);
        assert_eq!(first.attempt_count, 1);

        let second = harness.scheduler.run_attempt(&payload("facebook")).await.unwrap();
        assert_eq!(second.phase, PollPhase::Scheduled);
        assert_eq!(second.attempt_count, 2);

        let messages = harness.telemetry.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("connection reset"));
        assert_eq!(harness.webhook.events.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn never_runs_an_eleventh_cycle() {
        let harness = Harness::new(MockProvider::new(item("t")));
        started(&harness).await;

        for _ in 0..12 {
            harness.scheduler.run_attempt(&payload("facebook")).await;
        }

        assert_eq!(harness.fetcher.calls(), 10);
        assert_eq!(harness.webhook.events.lock().unwrap().len(), 10);
        let state = harness.polls.get(IDENTITY, "facebook").await.unwrap().unwrap();
        assert_eq!(state.phase, PollPhase::Exhausted);
        assert_eq!(state.attempt_count, 10);
    }

    #[tokio::test]
    async fn terminal_pairs_do_not_restart() {
        let harness = Harness::new(MockProvider::new(item("t")));
        started(&harness).await;
        harness.fetcher.push(Reply::Failure(10));
        harness.scheduler.run_attempt(&payload("facebook")).await;

        assert!(!harness
            .scheduler
            .start(IDENTITY, "facebook", "https://example.com/a", "", None)
            .await
            .unwrap());
        let state = harness.polls.get(IDENTITY, "facebook").await.unwrap().unwrap();
        assert_eq!(state.phase, PollPhase::Permanent);
    }

    #[tokio::test]
    async fn attempt_runs_with_the_pinned_credential() {
        let harness = Harness::with_credentials(
            MockProvider::new(item("t")),
            vec![
                ApiCredential::new("fb-a").with_facebook_app("a", "s"),
                ApiCredential::new("fb-b").with_facebook_app("b", "s"),
            ],
        );
        harness
            .scheduler
            .start(IDENTITY, "facebook", "https://example.com/a", "", Some("fb-b".to_string()))
            .await
            .unwrap();

        harness.scheduler.run_attempt(&payload("facebook")).await;

        assert_eq!(
            *harness.fetcher.scoped_credentials.lock().unwrap(),
            vec![Some("fb-b".to_string())]
        );
    }

    #[tokio::test]
    async fn rate_limited_key_is_rotated_away() {
        let harness = Harness::with_credentials(
            MockProvider::new(item("t")),
            vec![
                ApiCredential::new("fb-a").with_facebook_app("a", "s"),
                ApiCredential::new("fb-b").with_facebook_app("b", "s"),
            ],
        );
        harness
            .scheduler
            .start(IDENTITY, "facebook", "https://example.com/a", "", Some("fb-a".to_string()))
            .await
            .unwrap();
        harness.fetcher.push(Reply::Failure(4));

        let limited = harness.scheduler.run_attempt(&payload("facebook")).await.unwrap();
        assert!(limited.credential_id.is_none());

        harness.scheduler.run_attempt(&payload("facebook")).await;
        let seen = harness.fetcher.scoped_credentials.lock().unwrap().clone();
        assert_eq!(seen[0].as_deref(), Some("fb-a"));
        assert!(seen[1].is_some());
    }

    #[tokio::test]
    async fn missing_state_or_source_never_panics() {
        let harness = Harness::new(MockProvider::new(item("t")));
        assert!(harness.scheduler.run_attempt(&payload("facebook")).await.is_none());

        harness
            .scheduler
            .start(IDENTITY, "twitter", "https://example.com/a", "", None)
            .await
            .unwrap();
        let state = harness.scheduler.run_attempt(&payload("twitter")).await.unwrap();
        assert_eq!(state.phase, PollPhase::Scheduled);
        assert_eq!(state.attempt_count, 1);
        assert_eq!(harness.webhook.events.lock().unwrap().len(), 1);
        assert!(harness.telemetry.messages()[0].contains("no metrics source"));
    }
}
