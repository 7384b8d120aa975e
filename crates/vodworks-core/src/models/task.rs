use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// One output rendition of a transcode: target resolution, bitrate, and container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeProfile {
    pub resolution: String,
    pub bitrate_kbps: u32,
    pub container: String,
}

impl Display for TranscodeProfile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{}@{}kbps.{}",
            self.resolution, self.bitrate_kbps, self.container
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

/// Scheduling priority: an advisory integer, higher runs first when tasks
/// arrive together. Dispatch across distinct arrivals stays FIFO, so this
/// only breaks ties within a submission batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(i32);

impl Priority {
    /// Deferrable work such as bulk re-encodes of back-catalog media.
    pub const BACKGROUND: Priority = Priority(1);
    /// Regular uploads.
    pub const STANDARD: Priority = Priority(5);
    /// Editor-facing jobs that should win a same-batch tie.
    pub const EXPEDITED: Priority = Priority(9);

    pub fn new(value: i32) -> Self {
        Priority(value)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::STANDARD
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// A transcoding task: one source reference and one or more output profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Opaque source reference (path or URL); resolved by the executor.
    pub source: String,
    pub profiles: Vec<TranscodeProfile>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Worker currently holding the task. Set iff status is Processing.
    pub worker_id: Option<Uuid>,
    /// Percent complete, 0.0..=100.0. Non-decreasing while Processing.
    pub progress: f64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        source: String,
        profiles: Vec<TranscodeProfile>,
        priority: Priority,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            profiles,
            status: TaskStatus::Pending,
            priority,
            retry_count: 0,
            max_retries,
            worker_id: None,
            progress: 0.0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Response model for API endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub source: String,
    pub profiles: Vec<TranscodeProfile>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub worker_id: Option<Uuid>,
    pub progress: f64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            source: task.source,
            profiles: task.profiles,
            status: task.status,
            priority: task.priority,
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            worker_id: task.worker_id,
            progress: task.progress,
            error: task.error,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct TaskStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}
