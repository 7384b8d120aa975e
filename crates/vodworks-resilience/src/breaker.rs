//! Circuit breaker for outbound dependency calls.
//!
//! Three states: Closed (calls pass, failures counted against an absolute
//! threshold and a windowed failure rate), Open (calls refused until the
//! timeout elapses), HalfOpen (a bounded number of probes; consecutive
//! successes close the breaker, any failure reopens it).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use vodworks_core::{BreakerDefaults, SchedulerError};

/// Minimum requests in the window before the failure-rate trip applies, so
/// the first failure of a quiet breaker does not read as a 100% rate.
const MIN_RATE_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
    pub max_requests: u32,
    pub failure_rate_threshold: f64,
    pub window_time: Duration,
}

impl From<&BreakerDefaults> for BreakerConfig {
    fn from(defaults: &BreakerDefaults) -> Self {
        Self {
            failure_threshold: defaults.failure_threshold,
            success_threshold: defaults.success_threshold,
            timeout: defaults.timeout(),
            max_requests: defaults.max_requests,
            failure_rate_threshold: defaults.failure_rate_threshold,
            window_time: defaults.window_time(),
        }
    }
}

pub type StateChangeCallback = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Point-in-time breaker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Requests observed in the current window.
    pub request_count: u32,
    pub last_state_change: DateTime<Utc>,
    /// Milliseconds since the last failure, if any.
    pub last_failure_ms_ago: Option<u64>,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    /// Consecutive successes; meaningful only in HalfOpen.
    success_count: u32,
    half_open_inflight: u32,
    /// Outcomes in the sliding window: (when, failed).
    window: VecDeque<(Instant, bool)>,
    last_failure: Option<Instant>,
    last_state_change_at: DateTime<Utc>,
}

/// Guards state with a std mutex; it is never held across an await point.
/// `execute` takes the lock for admission, releases it for the call, and
/// re-takes it to record the outcome.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    on_state_change: Mutex<Option<StateChangeCallback>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_inflight: 0,
                window: VecDeque::new(),
                last_failure: None,
                last_state_change_at: Utc::now(),
            }),
            on_state_change: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a callback invoked on every state transition.
    pub fn set_state_change_callback(&self, callback: StateChangeCallback) {
        *self
            .on_state_change
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Run `f` under the breaker. Refused calls return
    /// [`SchedulerError::BreakerOpen`] without invoking `f`.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, SchedulerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(transition) = self.try_admit() {
            self.fire_callback(transition);
        } else {
            metrics::counter!("breaker.rejected", "breaker" => self.name.clone()).increment(1);
            return Err(SchedulerError::BreakerOpen(self.name.clone()));
        }

        match f().await {
            Ok(value) => {
                if let Some(transition) = self.record_success() {
                    self.fire_callback(Some(transition));
                }
                Ok(value)
            }
            Err(err) => {
                if let Some(transition) = self.record_failure() {
                    self.fire_callback(Some(transition));
                }
                Err(SchedulerError::Internal(err))
            }
        }
    }

    /// Force the breaker back to Closed and clear all counters.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.window.clear();
            inner.last_failure = None;
            self.transition(&mut inner, CircuitState::Closed)
        };
        if let Some(transition) = transition {
            self.fire_callback(Some(transition));
        }
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune_window(&mut inner, self.config.window_time);
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            request_count: inner.window.len() as u32,
            last_state_change: inner.last_state_change_at,
            last_failure_ms_ago: inner
                .last_failure
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Admission check. Returns `Some(transition)` when the call is admitted
    /// (with the Open→HalfOpen edge if it happened), `None` when refused.
    fn try_admit(&self) -> Option<Option<(CircuitState, CircuitState)>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => Some(None),
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.timeout)
                    .unwrap_or(true);
                if cooled {
                    let transition = self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_inflight = 1;
                    Some(transition)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_inflight < self.config.max_requests {
                    inner.half_open_inflight += 1;
                    Some(None)
                } else {
                    None
                }
            }
        }
    }

    fn record_success(&self) -> Option<(CircuitState, CircuitState)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.window.push_back((Instant::now(), false));
                Self::prune_window(&mut inner, self.config.window_time);
                None
            }
            CircuitState::HalfOpen => {
                inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed)
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        }
    }

    fn record_failure(&self) -> Option<(CircuitState, CircuitState)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.window.push_back((Instant::now(), true));
                Self::prune_window(&mut inner, self.config.window_time);
                if inner.failure_count >= self.config.failure_threshold
                    || Self::rate_tripped(&inner, self.config.failure_rate_threshold)
                {
                    self.transition(&mut inner, CircuitState::Open)
                } else {
                    None
                }
            }
            // A single half-open failure reopens before any further call
            // is admitted.
            CircuitState::HalfOpen => {
                inner.half_open_inflight = inner.half_open_inflight.saturating_sub(1);
                self.transition(&mut inner, CircuitState::Open)
            }
            CircuitState::Open => None,
        }
    }

    fn rate_tripped(inner: &BreakerInner, threshold: f64) -> bool {
        if inner.window.len() < MIN_RATE_SAMPLES {
            return false;
        }
        let failures = inner.window.iter().filter(|(_, failed)| *failed).count();
        failures as f64 / inner.window.len() as f64 >= threshold
    }

    fn prune_window(inner: &mut BreakerInner, window_time: Duration) {
        let cutoff = Instant::now() - window_time;
        while inner
            .window
            .front()
            .map(|(at, _)| *at < cutoff)
            .unwrap_or(false)
        {
            inner.window.pop_front();
        }
    }

    /// Apply a state change and reset the counters the new state expects.
    /// Returns the edge for callback/metric emission outside the lock.
    fn transition(
        &self,
        inner: &mut BreakerInner,
        to: CircuitState,
    ) -> Option<(CircuitState, CircuitState)> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        inner.last_state_change_at = Utc::now();
        match to {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.half_open_inflight = 0;
                inner.window.clear();
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
                inner.half_open_inflight = 0;
            }
            CircuitState::Open => {}
        }
        Some((from, to))
    }

    fn fire_callback(&self, transition: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = transition else { return };
        tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker state change");
        let state_value = match to {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 0.5,
            CircuitState::Open => 1.0,
        };
        metrics::gauge!("breaker.state", "breaker" => self.name.clone()).set(state_value);
        let callback = self
            .on_state_change
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(&self.name, from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> BreakerConfig {
        BreakerConfig {
            failure_threshold,
            success_threshold,
            timeout,
            max_requests: 1,
            failure_rate_threshold: 0.5,
            window_time: Duration::from_secs(60),
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), SchedulerError> {
        breaker
            .execute(|| async { Err::<(), _>(anyhow::anyhow!("dependency down")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), SchedulerError> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_stays_closed_below_threshold() {
        let breaker = CircuitBreaker::new("meta", config(3, 1, Duration::from_millis(100)));
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        // failure_count = threshold - 1: still closed.
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_refuses_without_invoking_fn() {
        let breaker = CircuitBreaker::new("store", config(1, 1, Duration::from_secs(60)));
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicUsize::new(0);
        let result = breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(SchedulerError::BreakerOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_half_open_closed_cycle() {
        let breaker = CircuitBreaker::new("bus", config(2, 2, Duration::from_millis(100)));
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(
            succeed(&breaker).await,
            Err(SchedulerError::BreakerOpen(_))
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("bus", config(2, 2, Duration::from_millis(100)));
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(150)).await;

        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
        // And the failure restarted the open timer: still refused.
        assert!(matches!(
            succeed(&breaker).await,
            Err(SchedulerError::BreakerOpen(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_rate_trips_with_enough_samples() {
        let mut cfg = config(100, 1, Duration::from_millis(100));
        cfg.failure_rate_threshold = 0.5;
        let breaker = CircuitBreaker::new("flaky", cfg);

        // Alternate success/failure; once the window holds enough samples
        // at >= 50% failure, the breaker opens long before the absolute
        // threshold of 100.
        for _ in 0..3 {
            succeed(&breaker).await.unwrap();
            fail(&breaker).await.unwrap_err();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures_when_closed() {
        let breaker = CircuitBreaker::new("meta", config(3, 1, Duration::from_millis(100)));
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.unwrap_err();
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset_forces_closed_and_clears_counters() {
        let breaker = CircuitBreaker::new("store", config(1, 1, Duration::from_secs(60)));
        fail(&breaker).await.unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        let stats = breaker.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.request_count, 0);
        succeed(&breaker).await.unwrap();
    }

    #[tokio::test]
    async fn test_state_change_callback_fires_on_transitions() {
        let breaker = Arc::new(CircuitBreaker::new(
            "cb",
            config(1, 1, Duration::from_millis(50)),
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        breaker.set_state_change_callback(Arc::new(move |_, from, to| {
            sink.lock().unwrap().push((from, to));
        }));

        fail(&breaker).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(80)).await;
        succeed(&breaker).await.unwrap();

        let transitions = seen.lock().unwrap().clone();
        assert_eq!(
            transitions,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }
}
