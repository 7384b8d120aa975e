//! Test support: a scripted executor and a capturing event bus.
//!
//! Shared by the unit tests here and, behind the `test-util` feature, by
//! downstream crates' integration tests. Never part of a production build.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use vodworks_core::models::Task;
use vodworks_core::{EventBus, ExecutorError, ProgressSender, TranscodeExecutor};

/// Outcome of one executor attempt.
pub enum MockOutcome {
    /// Report 50% then 100% progress and succeed.
    Succeed,
    /// Report the given progress values and succeed.
    SucceedWithProgress(Vec<f64>),
    FailTransient(&'static str),
    FailPermanent(&'static str),
    /// Block effectively forever; used to keep workers busy in tests.
    Hang,
}

/// Executor whose attempts follow a script; once the script is exhausted,
/// every further attempt succeeds.
pub struct MockExecutor {
    script: Mutex<VecDeque<MockOutcome>>,
    delay: Duration,
    attempts: AtomicUsize,
}

impl MockExecutor {
    pub fn always_ok() -> Arc<Self> {
        Self::with_script(vec![])
    }

    pub fn with_script(outcomes: Vec<MockOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            delay: Duration::ZERO,
            attempts: AtomicUsize::new(0),
        })
    }

    /// Like [`MockExecutor::with_script`], but every attempt takes at least
    /// `delay`. Useful to keep the queue backed up for scaling tests.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            delay,
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TranscodeExecutor for MockExecutor {
    async fn execute(&self, _task: &Task, progress: ProgressSender) -> Result<(), ExecutorError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let outcome = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(MockOutcome::Succeed);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match outcome {
            MockOutcome::Succeed => {
                let _ = progress.send(50.0);
                let _ = progress.send(100.0);
                Ok(())
            }
            MockOutcome::SucceedWithProgress(values) => {
                for value in values {
                    let _ = progress.send(value);
                }
                Ok(())
            }
            MockOutcome::FailTransient(msg) => Err(ExecutorError::transient(msg)),
            MockOutcome::FailPermanent(msg) => Err(ExecutorError::permanent(msg)),
            MockOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

/// Event bus that records every publish for assertions.
#[derive(Default)]
pub struct CapturingBus {
    events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl CapturingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Payloads published on one topic, in order.
    pub fn events_on(&self, topic: &str) -> Vec<serde_json::Value> {
        self.events()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload)
            .collect()
    }

    /// Topics of events concerning one task, in publish order.
    pub fn topics_for(&self, task_id: Uuid) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|(_, payload)| {
                payload["task_id"]
                    .as_str()
                    .is_some_and(|id| id == task_id.to_string())
            })
            .map(|(topic, _)| topic)
            .collect()
    }
}

#[async_trait]
impl EventBus for CapturingBus {
    async fn publish(&self, topic: &str, event: serde_json::Value) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((topic.to_string(), event));
        Ok(())
    }
}
