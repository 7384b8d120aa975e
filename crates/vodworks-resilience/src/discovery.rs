//! Service discovery: instance registry, watch streams, and HTTP health
//! monitors.
//!
//! The registry owns the instances; watch channels are torn down when the
//! subscriber's token fires, so later notifications never touch a closed
//! channel. Each instance with an HTTP health URL gets its own monitor task
//! holding only a weak reference back to the registry.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vodworks_core::models::{HealthCheckSpec, InstanceStatus, ServiceInstance};
use vodworks_core::SchedulerError;

const WATCH_CHANNEL_CAPACITY: usize = 16;

struct Watcher {
    id: Uuid,
    tx: mpsc::Sender<Vec<ServiceInstance>>,
}

pub struct ServiceRegistry {
    /// name -> instance id -> instance
    services: RwLock<HashMap<String, HashMap<String, ServiceInstance>>>,
    /// name -> active watchers
    watchers: RwLock<HashMap<String, Vec<Watcher>>>,
    /// instance id -> monitor cancellation
    monitors: std::sync::Mutex<HashMap<String, CancellationToken>>,
    http: reqwest::Client,
    token: CancellationToken,
}

impl ServiceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            services: RwLock::new(HashMap::new()),
            watchers: RwLock::new(HashMap::new()),
            monitors: std::sync::Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
            token: CancellationToken::new(),
        })
    }

    /// Register an instance. Assigns an id when missing, marks it Healthy,
    /// and spawns a health monitor when an HTTP health check is configured.
    /// Returns the instance id.
    pub async fn register(self: &Arc<Self>, mut instance: ServiceInstance) -> String {
        if instance.id.is_empty() {
            instance.id = Uuid::new_v4().to_string();
        }
        instance.status = InstanceStatus::Healthy;
        instance.last_seen = Utc::now();

        let id = instance.id.clone();
        let name = instance.name.clone();
        let health_check = instance.health_check.clone();

        {
            let mut services = self.services.write().await;
            services
                .entry(name.clone())
                .or_default()
                .insert(id.clone(), instance);
        }
        tracing::info!(service = %name, instance_id = %id, "Service instance registered");
        metrics::counter!("discovery.registered", "service" => name.clone()).increment(1);

        if let Some(spec) = health_check {
            self.spawn_monitor(name.clone(), id.clone(), spec);
        }
        self.notify(&name).await;
        id
    }

    pub async fn deregister(&self, id: &str) -> Result<(), SchedulerError> {
        let name = {
            let mut services = self.services.write().await;
            let mut found = None;
            for (name, instances) in services.iter_mut() {
                if instances.remove(id).is_some() {
                    found = Some(name.clone());
                    break;
                }
            }
            found.ok_or_else(|| SchedulerError::NotFound(format!("service instance {}", id)))?
        };

        if let Some(token) = self
            .monitors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
        {
            token.cancel();
        }
        tracing::info!(service = %name, instance_id = %id, "Service instance deregistered");
        self.notify(&name).await;
        Ok(())
    }

    /// Healthy instances of a named service. Unknown names read as empty.
    pub async fn discover(&self, name: &str) -> Vec<ServiceInstance> {
        let services = self.services.read().await;
        services
            .get(name)
            .map(|instances| {
                instances
                    .values()
                    .filter(|instance| instance.is_healthy())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Subscribe to healthy-instance lists for a service. The current list
    /// is delivered immediately; the channel closes and the watcher is
    /// removed when `token` is cancelled.
    pub async fn watch(
        self: &Arc<Self>,
        token: CancellationToken,
        name: &str,
    ) -> mpsc::Receiver<Vec<ServiceInstance>> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let watcher_id = Uuid::new_v4();

        let snapshot = self.discover(name).await;
        let _ = tx.try_send(snapshot);

        {
            let mut watchers = self.watchers.write().await;
            watchers.entry(name.to_string()).or_default().push(Watcher {
                id: watcher_id,
                tx,
            });
        }

        let registry = Arc::downgrade(self);
        let name = name.to_string();
        let root = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = root.cancelled() => {}
            }
            if let Some(registry) = registry.upgrade() {
                registry.remove_watcher(&name, watcher_id).await;
            }
        });
        rx
    }

    /// Explicitly set an instance's status (e.g. Draining ahead of a
    /// deploy). Watchers are notified on change.
    pub async fn set_status(
        &self,
        id: &str,
        status: InstanceStatus,
    ) -> Result<(), SchedulerError> {
        let changed_name = {
            let mut services = self.services.write().await;
            let mut found = None;
            'outer: for (name, instances) in services.iter_mut() {
                if let Some(instance) = instances.get_mut(id) {
                    instance.last_seen = Utc::now();
                    if instance.status != status {
                        instance.status = status;
                        found = Some((name.clone(), true));
                    } else {
                        found = Some((name.clone(), false));
                    }
                    break 'outer;
                }
            }
            found.ok_or_else(|| SchedulerError::NotFound(format!("service instance {}", id)))?
        };

        if changed_name.1 {
            tracing::info!(instance_id = %id, status = %status, "Instance status changed");
            self.notify(&changed_name.0).await;
        }
        Ok(())
    }

    /// Stop all monitors and close every watch channel.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.watchers.write().await.clear();
    }

    fn spawn_monitor(self: &Arc<Self>, name: String, id: String, spec: HealthCheckSpec) {
        let token = self.token.child_token();
        self.monitors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), token.clone());

        let registry = Arc::downgrade(self);
        let client = self.http.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(spec.interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let timeout = Duration::from_secs(spec.timeout_secs.max(1));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        let healthy = match client.get(&spec.url).timeout(timeout).send().await {
                            Ok(response) => response.status().is_success(),
                            Err(e) => {
                                tracing::debug!(instance_id = %id, error = %e, "Health probe failed");
                                false
                            }
                        };
                        let status = if healthy {
                            InstanceStatus::Healthy
                        } else {
                            InstanceStatus::Unhealthy
                        };
                        registry.apply_probe(&name, &id, status).await;
                    }
                }
            }
        });
    }

    /// Fold a probe result into the instance. Draining instances are left
    /// alone; the operator owns that state.
    async fn apply_probe(&self, name: &str, id: &str, status: InstanceStatus) {
        let changed = {
            let mut services = self.services.write().await;
            match services.get_mut(name).and_then(|m| m.get_mut(id)) {
                Some(instance) if instance.status != InstanceStatus::Draining => {
                    instance.last_seen = Utc::now();
                    if instance.status != status {
                        instance.status = status;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            }
        };
        if changed {
            tracing::info!(service = %name, instance_id = %id, status = %status, "Health probe changed instance status");
            metrics::gauge!("discovery.healthy_instances", "service" => name.to_string())
                .set(self.discover(name).await.len() as f64);
            self.notify(name).await;
        }
    }

    async fn notify(&self, name: &str) {
        let list = self.discover(name).await;
        let mut watchers = self.watchers.write().await;
        if let Some(subscribers) = watchers.get_mut(name) {
            subscribers.retain(|watcher| match watcher.tx.try_send(list.clone()) {
                Ok(()) => true,
                // A slow subscriber misses an update; the next one catches
                // it up. Closed channels are dropped from the list.
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => false,
            });
            if subscribers.is_empty() {
                watchers.remove(name);
            }
        }
    }

    async fn remove_watcher(&self, name: &str, watcher_id: Uuid) {
        let mut watchers = self.watchers.write().await;
        if let Some(subscribers) = watchers.get_mut(name) {
            subscribers.retain(|watcher| watcher.id != watcher_id);
            if subscribers.is_empty() {
                watchers.remove(name);
            }
        }
    }

    #[cfg(test)]
    async fn watcher_count(&self, name: &str) -> usize {
        self.watchers
            .read()
            .await
            .get(name)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}
