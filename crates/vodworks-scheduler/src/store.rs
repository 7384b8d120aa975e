//! In-memory task store.
//!
//! The store is the single mutator of task records: workers hold only a task
//! id across I/O and funnel every state change through here, so the status
//! machine invariants live in one place. Locks are per-call and never held
//! across I/O.

use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use vodworks_core::models::{Task, TaskStats, TaskStatus};
use vodworks_core::SchedulerError;

#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, task: Task) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(SchedulerError::Validation(format!(
                "task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id, task);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Task, SchedulerError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(format!("task {}", id)))
    }

    /// Replace a task record wholesale. Terminal records are immutable.
    pub async fn update(&self, task: Task) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let existing = tasks
            .get_mut(&task.id)
            .ok_or_else(|| SchedulerError::NotFound(format!("task {}", task.id)))?;
        if existing.is_terminal() {
            return Err(SchedulerError::InvalidState(format!(
                "task {} is {}",
                task.id, existing.status
            )));
        }
        *existing = task;
        Ok(())
    }

    /// Cancel a pending task. Tasks already processing run to completion and
    /// terminal tasks stay as they are; both report `InvalidState`.
    pub async fn cancel(&self, id: Uuid) -> Result<Task, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::NotFound(format!("task {}", id)))?;
        match task.status {
            TaskStatus::Pending => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                Ok(task.clone())
            }
            status => Err(SchedulerError::InvalidState(format!(
                "task {} is {}",
                id, status
            ))),
        }
    }

    /// Transition Pending → Processing under this worker. Fails when the task
    /// was cancelled (or otherwise moved on) between dequeue and claim.
    pub async fn mark_processing(
        &self,
        id: Uuid,
        worker_id: Uuid,
    ) -> Result<Task, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::NotFound(format!("task {}", id)))?;
        if task.status != TaskStatus::Pending {
            return Err(SchedulerError::InvalidState(format!(
                "task {} is {}",
                id, task.status
            )));
        }
        task.status = TaskStatus::Processing;
        task.worker_id = Some(worker_id);
        task.started_at = Some(Utc::now());
        Ok(task.clone())
    }

    /// Record executor progress. Regressions are clamped so the observed
    /// percentage never decreases while Processing.
    pub async fn update_progress(&self, id: Uuid, percent: f64) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::NotFound(format!("task {}", id)))?;
        if task.status == TaskStatus::Processing {
            task.progress = task.progress.max(percent.clamp(0.0, 100.0));
        }
        Ok(())
    }

    pub async fn mark_completed(&self, id: Uuid) -> Result<Task, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::NotFound(format!("task {}", id)))?;
        if task.status != TaskStatus::Processing {
            return Err(SchedulerError::InvalidState(format!(
                "task {} is {}",
                id, task.status
            )));
        }
        task.status = TaskStatus::Completed;
        task.progress = 100.0;
        task.completed_at = Some(Utc::now());
        Ok(task.clone())
    }

    pub async fn mark_failed(&self, id: Uuid, error: String) -> Result<Task, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::NotFound(format!("task {}", id)))?;
        if task.is_terminal() {
            return Err(SchedulerError::InvalidState(format!(
                "task {} is {}",
                id, task.status
            )));
        }
        task.status = TaskStatus::Failed;
        task.error = Some(error);
        task.completed_at = Some(Utc::now());
        Ok(task.clone())
    }

    /// Consume one retry and revert the task to Pending for re-dispatch.
    /// Callers must check the retry budget first.
    pub async fn reset_for_retry(&self, id: Uuid, error: String) -> Result<Task, SchedulerError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| SchedulerError::NotFound(format!("task {}", id)))?;
        if task.status != TaskStatus::Processing {
            return Err(SchedulerError::InvalidState(format!(
                "task {} is {}",
                id, task.status
            )));
        }
        if !task.can_retry() {
            return Err(SchedulerError::InvalidState(format!(
                "task {} has no retries left",
                id
            )));
        }
        task.retry_count += 1;
        task.status = TaskStatus::Pending;
        task.worker_id = None;
        task.started_at = None;
        task.progress = 0.0;
        task.error = Some(error);
        Ok(task.clone())
    }

    /// Drop a record entirely. Used to roll back registration when the queue
    /// rejects the submission.
    pub async fn remove(&self, id: Uuid) {
        self.tasks.write().await.remove(&id);
    }

    pub async fn list(&self, status: Option<TaskStatus>, limit: usize) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        out.truncate(limit);
        out
    }

    pub async fn stats(&self) -> TaskStats {
        let tasks = self.tasks.read().await;
        let mut stats = TaskStats {
            total: tasks.len() as u64,
            ..Default::default()
        };
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}
