use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    /// Busy but silent past the heartbeat deadline. Reported via metrics,
    /// never forcibly terminated.
    Unhealthy,
}

impl Display for WorkerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Snapshot of a single worker, as reported by the pool.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub id: Uuid,
    pub status: WorkerStatus,
    pub current_task: Option<Uuid>,
    pub completed_count: u64,
    pub failed_count: u64,
    /// Cumulative time spent executing tasks.
    #[serde(with = "duration_secs")]
    pub busy_time: Duration,
    pub last_heartbeat: DateTime<Utc>,
}

/// Statistics about the worker pool.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub unhealthy_workers: usize,
    pub total_processed: u64,
    pub total_failed: u64,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_status_display() {
        assert_eq!(WorkerStatus::Idle.to_string(), "idle");
        assert_eq!(WorkerStatus::Busy.to_string(), "busy");
        assert_eq!(WorkerStatus::Unhealthy.to_string(), "unhealthy");
    }

    #[test]
    fn test_worker_info_serializes_busy_time_as_seconds() {
        let info = WorkerInfo {
            id: Uuid::new_v4(),
            status: WorkerStatus::Idle,
            current_task: None,
            completed_count: 2,
            failed_count: 0,
            busy_time: Duration::from_millis(1500),
            last_heartbeat: Utc::now(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["busy_time"], 1.5);
        assert_eq!(json["status"], "idle");
    }
}
