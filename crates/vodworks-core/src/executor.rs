//! Transcode executor seam.
//!
//! The scheduler never runs FFmpeg itself; a worker hands the task to an
//! injected [`TranscodeExecutor`] and reacts to the classified outcome.
//! Progress flows back over an unbounded channel so the worker can fold it
//! into the task record without the executor touching the store.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::Task;

/// Channel on which an executor reports percent-complete values.
/// Values are expected to be monotonically non-decreasing in 0.0..=100.0;
/// the worker clamps regressions rather than trusting the producer.
pub type ProgressSender = mpsc::UnboundedSender<f64>;

/// A transcode failure, classified for the retry decision.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExecutorError {
    message: String,
    transient: bool,
    #[source]
    source: Option<anyhow::Error>,
}

impl ExecutorError {
    /// A failure worth retrying (network blip, transient resource pressure).
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
            source: None,
        }
    }

    /// A failure that will not succeed on retry (corrupt source, bad profile).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
            source: None,
        }
    }

    pub fn transient_with(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            message: message.into(),
            transient: true,
            source: Some(source),
        }
    }

    pub fn permanent_with(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            message: message.into(),
            transient: false,
            source: Some(source),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

/// Runs one task to completion.
///
/// Implementations report progress zero or more times on `progress` and
/// return `Ok(())` on success or a classified [`ExecutorError`]. The worker
/// decides retry from the classification and the task's retry budget.
#[async_trait]
pub trait TranscodeExecutor: Send + Sync {
    async fn execute(&self, task: &Task, progress: ProgressSender) -> Result<(), ExecutorError>;
}
