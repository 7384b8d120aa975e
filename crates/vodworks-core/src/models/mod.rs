pub mod service;
pub mod task;
pub mod worker;

pub use service::{HealthCheckSpec, InstanceStatus, ServiceInstance};
pub use task::{Priority, Task, TaskResponse, TaskStats, TaskStatus, TranscodeProfile};
pub use worker::{PoolStats, WorkerInfo, WorkerStatus};
