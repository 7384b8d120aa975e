//! Backlog-driven auto-scaler.
//!
//! One control loop per pool: each tick reads queue depth and active worker
//! count, computes their ratio, and moves the pool by at most one worker to
//! damp oscillation. This is the only feedback path from backlog to
//! capacity; submitters are shed at the queue instead.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vodworks_core::ScalingPolicy;

use crate::pool::WorkerPool;
use crate::queue::TaskQueue;

pub struct AutoScaler {
    pool: Arc<WorkerPool>,
    queue: Arc<TaskQueue>,
    policy: ScalingPolicy,
}

/// What one tick decided, for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Up(usize),
    Down(usize),
    Hold,
}

impl AutoScaler {
    pub fn new(pool: Arc<WorkerPool>, queue: Arc<TaskQueue>, policy: ScalingPolicy) -> Self {
        Self {
            pool,
            queue,
            policy,
        }
    }

    /// Spawn the control loop; it exits when the token is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.policy.check_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(
                min_workers = self.policy.min_workers,
                max_workers = self.policy.max_workers,
                scale_up_threshold = self.policy.scale_up_threshold,
                scale_down_threshold = self.policy.scale_down_threshold,
                "Auto-scaler started"
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => { self.tick().await; }
                }
            }
            tracing::info!("Auto-scaler stopped");
        })
    }

    /// Evaluate the policy once and apply at most a one-worker change.
    pub async fn tick(&self) -> ScaleDecision {
        let depth = self.queue.len();
        let workers = self.pool.size();
        let ratio = depth as f64 / workers.max(1) as f64;
        metrics::gauge!("autoscaler.ratio").set(ratio);

        if ratio > self.policy.scale_up_threshold && workers < self.policy.max_workers {
            let target = self.pool.scale(workers + 1).await;
            tracing::info!(depth = depth, ratio = ratio, target = target, "Scaling up");
            ScaleDecision::Up(target)
        } else if ratio < self.policy.scale_down_threshold
            && depth == 0
            && workers > self.policy.min_workers
        {
            let target = self.pool.scale(workers - 1).await;
            tracing::info!(ratio = ratio, target = target, "Scaling down");
            ScaleDecision::Down(target)
        } else {
            ScaleDecision::Hold
        }
    }
}
