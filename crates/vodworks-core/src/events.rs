//! Lifecycle event bus seam.
//!
//! Delivery is at-most-once and best-effort: the task record in the store is
//! the source of truth, subscribers must tolerate reordering and loss.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::TaskStatus;

/// Topics published by the scheduler core.
pub mod topics {
    pub const TASK_SUBMITTED: &str = "task.submitted";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_CANCELLED: &str = "task.cancelled";
    /// Pool lifecycle events (started, scaled, stopped).
    pub const PLUGIN_EVENTS: &str = "plugin.events";
}

/// Payload for `task.*` topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub worker_id: Option<Uuid>,
    /// Set only on `task.failed`: whether the task will be retried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(task_id: Uuid, status: TaskStatus, worker_id: Option<Uuid>) -> Self {
        Self {
            task_id,
            status,
            worker_id,
            retryable: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(task_id: Uuid, worker_id: Option<Uuid>, error: String, retryable: bool) -> Self {
        Self {
            task_id,
            status: if retryable {
                TaskStatus::Pending
            } else {
                TaskStatus::Failed
            },
            worker_id,
            retryable: Some(retryable),
            error: Some(error),
            timestamp: Utc::now(),
        }
    }
}

/// Publishes lifecycle events to collaborating services.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, event: serde_json::Value) -> anyhow::Result<()>;
}

/// In-process bus over a tokio broadcast channel. Used by the API process
/// and by tests; drops events when nobody is subscribed, which matches the
/// at-most-once contract.
pub struct BroadcastEventBus {
    tx: broadcast::Sender<(String, serde_json::Value)>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, serde_json::Value)> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, topic: &str, event: serde_json::Value) -> anyhow::Result<()> {
        // A send error only means no subscribers; that is not a failure.
        let _ = self.tx.send((topic.to_string(), event));
        Ok(())
    }
}

/// No-op bus for when no event collaborator is configured.
pub struct NoopEventBus;

#[async_trait]
impl EventBus for NoopEventBus {
    async fn publish(&self, _topic: &str, _event: serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }
}
