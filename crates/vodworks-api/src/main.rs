use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use vodworks_api::{router, telemetry, AppState};
use vodworks_core::models::{HealthCheckSpec, InstanceStatus, ServiceInstance};
use vodworks_core::{BroadcastEventBus, EventBus, SchedulerConfig};
use vodworks_resilience::{BreakerProtectedBus, BreakerRegistry, ServiceRegistry};
use vodworks_scheduler::{AutoScaler, TaskQueue, TaskStore, WorkerPool};
use vodworks_transcode::{FfmpegConfig, FfmpegExecutor};

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_telemetry();

    let config = SchedulerConfig::from_env()?;
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    let store = Arc::new(TaskStore::new());
    let breakers = Arc::new(BreakerRegistry::new(&config.breaker_defaults));

    let raw_bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
    let bus: Arc<dyn EventBus> = Arc::new(BreakerProtectedBus::new(raw_bus, &breakers));
    let queue = Arc::new(TaskQueue::new(
        store.clone(),
        bus.clone(),
        config.max_queue_size,
    ));

    let executor = Arc::new(FfmpegExecutor::new(FfmpegConfig::from_env()));
    let pool = WorkerPool::new(
        queue.clone(),
        store.clone(),
        executor,
        bus.clone(),
        config.clone(),
    );
    pool.start().await;

    let shutdown = CancellationToken::new();
    let scaler = AutoScaler::new(pool.clone(), queue.clone(), config.scaling.clone());
    let scaler_handle = scaler.spawn(shutdown.child_token());

    let discovery = ServiceRegistry::new();
    let self_id = register_self(&discovery, &config).await;

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        queue,
        pool: pool.clone(),
        breakers,
        discovery: discovery.clone(),
        bus,
        metrics_handle: Some(metrics_handle),
    });

    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", config.server_port)).await?;
    tracing::info!(port = config.server_port, "Vodworks API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, draining");
    shutdown.cancel();
    let _ = scaler_handle.await;
    if let Err(e) = discovery.deregister(&self_id).await {
        tracing::warn!(error = %e, "Self-deregistration failed");
    }
    discovery.shutdown().await;
    if let Err(e) = pool.shutdown(SHUTDOWN_DRAIN).await {
        tracing::warn!(error = %e, "Worker pool drain incomplete");
    }
    Ok(())
}

/// Register this process with service discovery so peers can find it.
async fn register_self(discovery: &Arc<ServiceRegistry>, config: &SchedulerConfig) -> String {
    let address = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let health_url = format!("http://{}:{}/health", address, config.server_port);
    discovery
        .register(ServiceInstance {
            id: String::new(),
            name: config.service_name.clone(),
            address,
            port: config.server_port,
            tags: vec!["scheduler".to_string(), "transcode".to_string()],
            metadata: HashMap::new(),
            health_check: Some(HealthCheckSpec {
                url: health_url,
                interval_secs: config.health_check_interval_secs,
                timeout_secs: 5,
            }),
            status: InstanceStatus::Unknown,
            last_seen: chrono::Utc::now(),
        })
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
