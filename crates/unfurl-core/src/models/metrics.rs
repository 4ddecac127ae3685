use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Lifecycle of one (identity, provider) metrics pair
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PollPhase {
    Idle,
    Fetching,
    Scheduled,
    RateLimited,
    /// Provider said the resource will never have metrics
    Permanent,
    /// Attempt budget spent
    Exhausted,
}

impl PollPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollPhase::Permanent | PollPhase::Exhausted)
    }
}

impl Display for PollPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            PollPhase::Idle => write!(f, "idle"),
            PollPhase::Fetching => write!(f, "fetching"),
            PollPhase::Scheduled => write!(f, "scheduled"),
            PollPhase::RateLimited => write!(f, "rate_limited"),
            PollPhase::Permanent => write!(f, "permanent"),
            PollPhase::Exhausted => write!(f, "exhausted"),
        }
    }
}

impl FromStr for PollPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(PollPhase::Idle),
            "fetching" => Ok(PollPhase::Fetching),
            "scheduled" => Ok(PollPhase::Scheduled),
            "rate_limited" => Ok(PollPhase::RateLimited),
            "permanent" => Ok(PollPhase::Permanent),
            "exhausted" => Ok(PollPhase::Exhausted),
            _ => Err(anyhow::anyhow!("Invalid poll phase: {}", s)),
        }
    }
}

/// Durable polling state for one (identity, provider) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPollState {
    pub identity: String,
    pub provider: String,
    /// Canonical URL of the media
    pub url: String,
    pub external_id: String,
    pub credential_id: Option<String>,
    /// Completed poll cycles; rate-limited attempts do not count
    pub attempt_count: i32,
    pub next_run_at: DateTime<Utc>,
    pub last_value: Option<Value>,
    pub phase: PollPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MetricsPollState {
    pub fn new(
        identity: impl Into<String>,
        provider: impl Into<String>,
        url: impl Into<String>,
        external_id: impl Into<String>,
        credential_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            identity: identity.into(),
            provider: provider.into(),
            url: url.into(),
            external_id: external_id.into(),
            credential_id,
            attempt_count: 0,
            next_run_at: now,
            last_value: None,
            phase: PollPhase::Idle,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Scheduling constants for metrics polling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsPolicy {
    pub max_attempts: i32,
    pub refresh_interval: Duration,
    pub rate_limit_delay: Duration,
}

impl Default for MetricsPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            refresh_interval: Duration::hours(24),
            rate_limit_delay: Duration::hours(1),
        }
    }
}
