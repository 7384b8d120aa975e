//! Load balancing policies over discovered healthy instances.

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use vodworks_core::models::ServiceInstance;
use vodworks_core::SchedulerError;

use crate::discovery::ServiceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalancePolicy {
    #[default]
    RoundRobin,
    Random,
    /// Minimum of the `connections` metadata value.
    LeastConnections,
    /// Cumulative-weight selection over the `weight` metadata value.
    WeightedRoundRobin,
}

pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    policy: BalancePolicy,
    /// Per-service round-robin position.
    counters: Mutex<HashMap<String, usize>>,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, policy: BalancePolicy) -> Self {
        Self {
            registry,
            policy,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Pick one healthy instance of `service` under the configured policy.
    pub async fn pick(&self, service: &str) -> Result<ServiceInstance, SchedulerError> {
        let mut instances = self.registry.discover(service).await;
        if instances.is_empty() {
            return Err(SchedulerError::NoHealthyInstances(service.to_string()));
        }
        // Stable order so the rotating policies rotate over a fixed ring.
        instances.sort_by(|a, b| a.id.cmp(&b.id));

        let chosen = match self.policy {
            BalancePolicy::RoundRobin => {
                let position = self.advance(service);
                instances[position % instances.len()].clone()
            }
            BalancePolicy::Random => {
                let index = rand::rng().random_range(0..instances.len());
                instances[index].clone()
            }
            BalancePolicy::LeastConnections => {
                let chosen = instances
                    .iter()
                    .min_by_key(|instance| instance.connections())
                    .cloned();
                chosen.unwrap_or_else(|| instances[0].clone())
            }
            BalancePolicy::WeightedRoundRobin => {
                let total: u64 = instances.iter().map(|i| i.weight() as u64).sum();
                let mut position = (self.advance(service) as u64) % total;
                let mut chosen = instances[0].clone();
                for instance in &instances {
                    let weight = instance.weight() as u64;
                    if position < weight {
                        chosen = instance.clone();
                        break;
                    }
                    position -= weight;
                }
                chosen
            }
        };
        Ok(chosen)
    }

    fn advance(&self, service: &str) -> usize {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let counter = counters.entry(service.to_string()).or_insert(0);
        let position = *counter;
        *counter = counter.wrapping_add(1);
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vodworks_core::models::InstanceStatus;

    async fn registry_with(
        service: &str,
        specs: &[(&str, &[(&str, &str)])],
    ) -> Arc<ServiceRegistry> {
        let registry = ServiceRegistry::new();
        for (id, metadata) in specs {
            registry
                .register(ServiceInstance {
                    id: id.to_string(),
                    name: service.to_string(),
                    address: "10.0.0.1".to_string(),
                    port: 9000,
                    tags: vec![],
                    metadata: metadata
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                    health_check: None,
                    status: InstanceStatus::Unknown,
                    last_seen: Utc::now(),
                })
                .await;
        }
        registry
    }

    #[tokio::test]
    async fn test_empty_set_is_no_healthy_instances() {
        let registry = ServiceRegistry::new();
        let balancer = LoadBalancer::new(registry, BalancePolicy::RoundRobin);
        assert!(matches!(
            balancer.pick("ghost").await.unwrap_err(),
            SchedulerError::NoHealthyInstances(_)
        ));
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let registry = registry_with("meta", &[("a", &[]), ("b", &[]), ("c", &[])]).await;
        let balancer = LoadBalancer::new(registry, BalancePolicy::RoundRobin);
        let picks: Vec<String> = [
            balancer.pick("meta").await.unwrap().id,
            balancer.pick("meta").await.unwrap().id,
            balancer.pick("meta").await.unwrap().id,
            balancer.pick("meta").await.unwrap().id,
        ]
        .into();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_random_stays_within_set() {
        let registry = registry_with("meta", &[("a", &[]), ("b", &[])]).await;
        let balancer = LoadBalancer::new(registry, BalancePolicy::Random);
        for _ in 0..20 {
            let picked = balancer.pick("meta").await.unwrap().id;
            assert!(picked == "a" || picked == "b");
        }
    }

    #[tokio::test]
    async fn test_least_connections_picks_minimum() {
        let registry = registry_with(
            "store",
            &[
                ("a", &[("connections", "12")]),
                ("b", &[("connections", "3")]),
                ("c", &[("connections", "7")]),
            ],
        )
        .await;
        let balancer = LoadBalancer::new(registry, BalancePolicy::LeastConnections);
        assert_eq!(balancer.pick("store").await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_weighted_round_robin_follows_weights() {
        let registry = registry_with(
            "store",
            &[("a", &[("weight", "3")]), ("b", &[("weight", "1")])],
        )
        .await;
        let balancer = LoadBalancer::new(registry, BalancePolicy::WeightedRoundRobin);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..8 {
            *counts
                .entry(balancer.pick("store").await.unwrap().id)
                .or_default() += 1;
        }
        assert_eq!(counts["a"], 6);
        assert_eq!(counts["b"], 2);
    }

    #[tokio::test]
    async fn test_per_service_counters_are_independent() {
        let registry = registry_with("a", &[("a1", &[]), ("a2", &[])]).await;
        registry
            .register(ServiceInstance {
                id: "b1".to_string(),
                name: "b".to_string(),
                address: "10.0.0.2".to_string(),
                port: 9001,
                tags: vec![],
                metadata: HashMap::new(),
                health_check: None,
                status: InstanceStatus::Unknown,
                last_seen: Utc::now(),
            })
            .await;
        let balancer = LoadBalancer::new(registry, BalancePolicy::RoundRobin);
        assert_eq!(balancer.pick("a").await.unwrap().id, "a1");
        assert_eq!(balancer.pick("b").await.unwrap().id, "b1");
        // Picking from "b" did not advance "a"'s rotation.
        assert_eq!(balancer.pick("a").await.unwrap().id, "a2");
    }
}
