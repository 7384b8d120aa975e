//! Error types module
//!
//! Every error surfaced by the scheduler core is a variant of
//! [`SchedulerError`]. Ingress operations return at most one kind; the API
//! layer maps each kind onto a single HTTP status.

use crate::executor::ExecutorError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Queue is at capacity")]
    QueueFull,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Circuit breaker '{0}' is open")]
    BreakerOpen(String),

    #[error("No healthy instances for service '{0}'")]
    NoHealthyInstances(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SchedulerError {
    /// HTTP status code for the API layer.
    pub fn http_status_code(&self) -> u16 {
        match self {
            SchedulerError::Validation(_) => 400,
            SchedulerError::QueueFull => 503,
            SchedulerError::NotFound(_) => 404,
            SchedulerError::InvalidState(_) => 409,
            SchedulerError::BreakerOpen(_) => 503,
            SchedulerError::NoHealthyInstances(_) => 503,
            SchedulerError::Timeout(_) => 504,
            SchedulerError::Executor(_) => 500,
            SchedulerError::Internal(_) => 500,
        }
    }

    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            SchedulerError::Validation(_) => "VALIDATION_ERROR",
            SchedulerError::QueueFull => "QUEUE_FULL",
            SchedulerError::NotFound(_) => "NOT_FOUND",
            SchedulerError::InvalidState(_) => "INVALID_STATE",
            SchedulerError::BreakerOpen(_) => "BREAKER_OPEN",
            SchedulerError::NoHealthyInstances(_) => "NO_HEALTHY_INSTANCES",
            SchedulerError::Timeout(_) => "TIMEOUT",
            SchedulerError::Executor(_) => "EXECUTOR_ERROR",
            SchedulerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a caller may reasonably retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Validation(_) => false,
            SchedulerError::QueueFull => true,
            SchedulerError::NotFound(_) => false,
            SchedulerError::InvalidState(_) => false,
            SchedulerError::BreakerOpen(_) => true,
            SchedulerError::NoHealthyInstances(_) => true,
            SchedulerError::Timeout(_) => true,
            SchedulerError::Executor(e) => e.is_transient(),
            SchedulerError::Internal(_) => true,
        }
    }
}
