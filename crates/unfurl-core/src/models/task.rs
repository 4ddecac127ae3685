use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Resolve a URL in the background
    ResolveMedia,
    /// One metrics attempt for an (identity, provider) pair
    MetricsPoll,
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskType::ResolveMedia => write!(f, "resolve_media"),
            TaskType::MetricsPoll => write!(f, "metrics_poll"),
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resolve_media" => Ok(TaskType::ResolveMedia),
            "metrics_poll" => Ok(TaskType::MetricsPoll),
            _ => Err(anyhow::anyhow!("Invalid task type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Scheduled => write!(f, "scheduled"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "scheduled" => Ok(TaskStatus::Scheduled),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

/// A durable unit of queued work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub payload: serde_json::Value,
    pub scheduled_at: DateTime<Utc>,
    pub max_retries: i32,
    pub timeout_seconds: Option<i32>,
}

impl NewTask {
    /// Build a task from a typed payload, due at `scheduled_at`.
    pub fn from_payload<P: TaskPayload>(
        payload: &P,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            task_type: P::task_type(),
            payload: serde_json::to_value(payload)?,
            scheduled_at,
            max_retries: 3,
            timeout_seconds: None,
        })
    }

    pub fn with_limits(mut self, max_retries: i32, timeout_seconds: Option<i32>) -> Self {
        self.max_retries = max_retries;
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Initial status: scheduled when due in the future, pending otherwise.
    pub fn initial_status(&self, now: DateTime<Utc>) -> TaskStatus {
        if self.scheduled_at > now {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Pending
        }
    }
}

impl Task {
    pub fn is_ready_to_run(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Scheduled) && self.scheduled_at <= now
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Extract the payload as a typed struct, returning an error on failure.
    pub fn try_payload_as<P: TaskPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Trait for type-safe task payloads
pub trait TaskPayload: Serialize + for<'de> Deserialize<'de> {
    fn task_type() -> TaskType;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveMediaPayload {
    pub url: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub credential_id: Option<String>,
}

impl TaskPayload for ResolveMediaPayload {
    fn task_type() -> TaskType {
        TaskType::ResolveMedia
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsPollPayload {
    pub identity: String,
    pub provider: String,
}

impl TaskPayload for MetricsPollPayload {
    fn task_type() -> TaskType {
        TaskType::MetricsPoll
    }
}
