//! Bounded FIFO handoff between submitters and workers.
//!
//! Submission never blocks: a full channel surfaces `QueueFull` and the
//! caller sheds load. Workers pull with a cancellable dequeue. Priority is
//! advisory (recorded on the task, used by submitters batching uploads);
//! dispatch order is arrival order.

use async_channel::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vodworks_core::events::{topics, TaskEvent};
use vodworks_core::models::{Task, TaskStatus};
use vodworks_core::{EventBus, QueueMetrics, SchedulerError};

use crate::store::TaskStore;

struct QueuedTask {
    id: Uuid,
    enqueued_at: Instant,
}

pub struct TaskQueue {
    tx: Sender<QueuedTask>,
    rx: Receiver<QueuedTask>,
    store: Arc<TaskStore>,
    bus: Arc<dyn EventBus>,
    metrics: Arc<QueueMetrics>,
    max_size: usize,
}

impl TaskQueue {
    pub fn new(store: Arc<TaskStore>, bus: Arc<dyn EventBus>, max_size: usize) -> Self {
        let (tx, rx) = async_channel::bounded(max_size);
        Self {
            tx,
            rx,
            store,
            bus,
            metrics: Arc::new(QueueMetrics::new()),
            max_size,
        }
    }

    /// Register a new task, announce it, and place it on the channel.
    ///
    /// `task.submitted` goes out before the task is visible to workers, so
    /// it precedes that task's `task.started`. On `QueueFull` the store
    /// registration is rolled back; subscribers hold the store as source of
    /// truth, so the stray announcement for a shed submission is tolerable.
    pub async fn enqueue(&self, task: Task) -> Result<Uuid, SchedulerError> {
        let id = task.id;
        debug_assert_eq!(task.status, TaskStatus::Pending);
        if self.tx.is_full() {
            tracing::warn!(task_id = %id, "Queue is full, rejecting submission");
            return Err(SchedulerError::QueueFull);
        }
        self.store.create(task).await?;

        let event = TaskEvent::new(id, TaskStatus::Pending, None);
        if let Ok(payload) = serde_json::to_value(&event) {
            if let Err(e) = self.bus.publish(topics::TASK_SUBMITTED, payload).await {
                tracing::warn!(task_id = %id, error = %e, "Submit event publish failed");
            }
        }

        match self.tx.try_send(QueuedTask {
            id,
            enqueued_at: Instant::now(),
        }) {
            Ok(()) => {
                self.metrics.record_enqueue();
                tracing::info!(task_id = %id, depth = self.len(), "Task enqueued");
                Ok(id)
            }
            Err(TrySendError::Full(_)) => {
                self.store.remove(id).await;
                tracing::warn!(task_id = %id, "Queue is full, rejecting submission");
                Err(SchedulerError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.store.remove(id).await;
                Err(SchedulerError::Internal(anyhow::anyhow!(
                    "task queue channel closed"
                )))
            }
        }
    }

    /// Put an already-registered task back on the channel after a retry
    /// reset. The slot freed by this worker's dequeue may have been taken by
    /// a submitter in the meantime, so a full channel is possible; the
    /// caller decides what to do with the task in that case.
    pub fn requeue(&self, id: Uuid) -> Result<(), SchedulerError> {
        match self.tx.try_send(QueuedTask {
            id,
            enqueued_at: Instant::now(),
        }) {
            Ok(()) => {
                self.metrics.record_enqueue();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(SchedulerError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(SchedulerError::Internal(anyhow::anyhow!(
                "task queue channel closed"
            ))),
        }
    }

    /// Pull the oldest queued task, blocking until one is available or the
    /// token is cancelled. Tasks cancelled while Pending are skipped here so
    /// they are never dispatched.
    pub async fn dequeue(&self, token: &CancellationToken) -> Option<Task> {
        loop {
            let queued = tokio::select! {
                _ = token.cancelled() => return None,
                recv = self.rx.recv() => recv.ok()?,
            };
            self.metrics.record_dequeue(queued.enqueued_at.elapsed());

            match self.store.get(queued.id).await {
                Ok(task) if task.status == TaskStatus::Pending => return Some(task),
                Ok(task) => {
                    tracing::debug!(
                        task_id = %task.id,
                        status = %task.status,
                        "Skipping dequeued task that is no longer pending"
                    );
                }
                Err(_) => {
                    tracing::debug!(task_id = %queued.id, "Dequeued task no longer in store");
                }
            }
        }
    }

    /// Approximate depth; a scheduling signal, not a guarantee.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CapturingBus;
    use vodworks_core::models::{Priority, TranscodeProfile};
    use vodworks_core::NoopEventBus;

    fn task() -> Task {
        Task::new(
            "s3://media/in.mov".to_string(),
            vec![TranscodeProfile {
                resolution: "1280x720".to_string(),
                bitrate_kbps: 2500,
                container: "mp4".to_string(),
            }],
            Priority::STANDARD,
            3,
        )
    }

    fn queue(max: usize) -> (Arc<TaskStore>, TaskQueue) {
        let store = Arc::new(TaskStore::new());
        let queue = TaskQueue::new(store.clone(), Arc::new(NoopEventBus), max);
        (store, queue)
    }

    #[tokio::test]
    async fn test_enqueue_registers_and_dequeue_returns_fifo() {
        let (_store, queue) = queue(4);
        let first = queue.enqueue(task()).await.unwrap();
        let second = queue.enqueue(task()).await.unwrap();

        let token = CancellationToken::new();
        assert_eq!(queue.dequeue(&token).await.unwrap().id, first);
        assert_eq!(queue.dequeue(&token).await.unwrap().id, second);
    }

    #[tokio::test]
    async fn test_queue_full_boundary() {
        let (store, queue) = queue(2);
        queue.enqueue(task()).await.unwrap();
        // depth = max - 1: still accepted.
        queue.enqueue(task()).await.unwrap();
        // depth = max: rejected, and the record is rolled back.
        let rejected = task();
        let rejected_id = rejected.id;
        assert!(matches!(
            queue.enqueue(rejected).await.unwrap_err(),
            SchedulerError::QueueFull
        ));
        assert!(store.get(rejected_id).await.is_err());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_dequeue_skips_cancelled_tasks() {
        let (store, queue) = queue(4);
        let cancelled = queue.enqueue(task()).await.unwrap();
        let live = queue.enqueue(task()).await.unwrap();
        store.cancel(cancelled).await.unwrap();

        let token = CancellationToken::new();
        assert_eq!(queue.dequeue(&token).await.unwrap().id, live);
    }

    #[tokio::test]
    async fn test_dequeue_honors_cancellation() {
        let (_store, queue) = queue(4);
        let token = CancellationToken::new();
        token.cancel();
        assert!(queue.dequeue(&token).await.is_none());
    }

    #[tokio::test]
    async fn test_depth_never_exceeds_max() {
        let (_store, queue) = queue(3);
        for _ in 0..10 {
            let _ = queue.enqueue(task()).await;
        }
        assert!(queue.len() <= queue.max_size());
    }

    #[tokio::test]
    async fn test_enqueue_announces_submission() {
        let store = Arc::new(TaskStore::new());
        let bus = Arc::new(CapturingBus::new());
        let queue = TaskQueue::new(store, bus.clone(), 4);

        let id = queue.enqueue(task()).await.unwrap();
        let submitted = bus.events_on("task.submitted");
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0]["task_id"], id.to_string());
        assert_eq!(submitted[0]["status"], "pending");
    }
}
