use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use vodworks_core::{EventBus, SchedulerConfig};
use vodworks_resilience::{BreakerRegistry, ServiceRegistry};
use vodworks_scheduler::{TaskQueue, TaskStore, WorkerPool};

/// Shared application state behind every handler.
pub struct AppState {
    pub config: SchedulerConfig,
    pub store: Arc<TaskStore>,
    pub queue: Arc<TaskQueue>,
    pub pool: Arc<WorkerPool>,
    pub breakers: Arc<BreakerRegistry>,
    pub discovery: Arc<ServiceRegistry>,
    pub bus: Arc<dyn EventBus>,
    /// Absent in tests, where no global recorder is installed.
    pub metrics_handle: Option<PrometheusHandle>,
}
