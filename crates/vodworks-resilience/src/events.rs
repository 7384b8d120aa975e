//! Breaker-protected event bus decorator.
//!
//! Wraps any [`EventBus`] so that publishes run under the `event-bus`
//! breaker: when the bus is misbehaving the breaker sheds the publish
//! instead of stalling workers. Lifecycle events are best-effort, so a
//! refused publish is an error for the caller to log, not a task failure.

use async_trait::async_trait;
use std::sync::Arc;

use vodworks_core::EventBus;

use crate::breaker::CircuitBreaker;
use crate::registry::BreakerRegistry;

pub const EVENT_BUS_BREAKER: &str = "event-bus";

pub struct BreakerProtectedBus {
    inner: Arc<dyn EventBus>,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerProtectedBus {
    pub fn new(inner: Arc<dyn EventBus>, breakers: &BreakerRegistry) -> Self {
        Self {
            inner,
            breaker: breakers.get_or_create(EVENT_BUS_BREAKER),
        }
    }
}

#[async_trait]
impl EventBus for BreakerProtectedBus {
    async fn publish(&self, topic: &str, event: serde_json::Value) -> anyhow::Result<()> {
        let inner = self.inner.clone();
        let topic_owned = topic.to_string();
        self.breaker
            .execute(move || async move { inner.publish(&topic_owned, event).await })
            .await
            .map_err(anyhow::Error::from)
    }
}
