//! Errors returned by queued work
//!
//! Task handlers wrap failures in [`TaskError`] to tell the worker whether the
//! task should be retried. Plain `anyhow` errors are treated as recoverable.

use std::fmt;

/// Failure of a queued task, tagged with its retry disposition
#[derive(Debug)]
pub struct TaskError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl TaskError {
    /// The task fails immediately and is not retried.
    ///
    /// Use for payloads that cannot be decoded or references to records that
    /// no longer exist.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// The task goes back to the queue with backoff until its retry budget runs out.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }

    /// Inspect an `anyhow::Error` returned by a handler. Only an explicit
    /// unrecoverable `TaskError` stops retries.
    pub fn is_unrecoverable(err: &anyhow::Error) -> bool {
        err.downcast_ref::<TaskError>()
            .map(|te| !te.recoverable)
            .unwrap_or(false)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Marks a failed result as unrecoverable
pub trait TaskResultExt<T> {
    fn unrecoverable(self) -> Result<T, TaskError>;
}

impl<T, E: Into<anyhow::Error>> TaskResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, TaskError> {
        self.map_err(|e| TaskError::unrecoverable(e.into()))
    }
}
