//! Configuration module
//!
//! Environment-driven configuration for the scheduler, worker pool,
//! auto-scaler, and circuit breaker defaults. Out-of-range values fail
//! validation at startup rather than surfacing later as odd behavior.

use std::env;
use std::time::Duration;

const WORKER_POOL_SIZE: usize = 2;
const MAX_CONCURRENT_TASKS: usize = 8;
const MAX_QUEUE_SIZE: usize = 100;
const TASK_TIMEOUT_SECS: u64 = 3600;
const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
const UNHEALTHY_AFTER_SECS: u64 = 300;

const MIN_WORKERS: usize = 1;
const MAX_WORKERS: usize = 8;
const SCALE_UP_THRESHOLD: f64 = 2.0;
const SCALE_DOWN_THRESHOLD: f64 = 0.5;
const SCALE_CHECK_INTERVAL_MS: u64 = 10_000;

const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_SUCCESS_THRESHOLD: u32 = 2;
const BREAKER_TIMEOUT_SECS: u64 = 60;
const BREAKER_MAX_REQUESTS: u32 = 1;
const BREAKER_FAILURE_RATE_THRESHOLD: f64 = 0.5;
const BREAKER_WINDOW_SECS: u64 = 60;

const SERVER_PORT: u16 = 4000;

/// Auto-scaler policy bounds and thresholds.
#[derive(Debug, Clone)]
pub struct ScalingPolicy {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Scale up when queue depth / workers exceeds this.
    pub scale_up_threshold: f64,
    /// Scale down when the ratio is below this and the queue is empty.
    pub scale_down_threshold: f64,
    pub check_interval_ms: u64,
}

impl ScalingPolicy {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_workers: MIN_WORKERS,
            max_workers: MAX_WORKERS,
            scale_up_threshold: SCALE_UP_THRESHOLD,
            scale_down_threshold: SCALE_DOWN_THRESHOLD,
            check_interval_ms: SCALE_CHECK_INTERVAL_MS,
        }
    }
}

/// Default parameters for breakers created through the registry.
#[derive(Debug, Clone)]
pub struct BreakerDefaults {
    /// Absolute failure count that opens the breaker.
    pub failure_threshold: u32,
    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub timeout_secs: u64,
    /// Probes admitted concurrently while half-open.
    pub max_requests: u32,
    /// Windowed failure rate (0, 1] that opens the breaker.
    pub failure_rate_threshold: f64,
    /// Length of the sliding failure window.
    pub window_secs: u64,
}

impl BreakerDefaults {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn window_time(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for BreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: BREAKER_FAILURE_THRESHOLD,
            success_threshold: BREAKER_SUCCESS_THRESHOLD,
            timeout_secs: BREAKER_TIMEOUT_SECS,
            max_requests: BREAKER_MAX_REQUESTS,
            failure_rate_threshold: BREAKER_FAILURE_RATE_THRESHOLD,
            window_secs: BREAKER_WINDOW_SECS,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub server_port: u16,
    pub service_name: String,
    /// Initial worker count; must sit within the scaling bounds.
    pub worker_pool_size: usize,
    pub max_concurrent_tasks: usize,
    pub max_queue_size: usize,
    pub task_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    /// A busy worker silent for longer than this is marked unhealthy.
    pub unhealthy_after_secs: u64,
    pub default_max_retries: u32,
    pub scaling: ScalingPolicy,
    pub breaker_defaults: BreakerDefaults,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            server_port: SERVER_PORT,
            service_name: "vodworks-scheduler".to_string(),
            worker_pool_size: WORKER_POOL_SIZE,
            max_concurrent_tasks: MAX_CONCURRENT_TASKS,
            max_queue_size: MAX_QUEUE_SIZE,
            task_timeout_secs: TASK_TIMEOUT_SECS,
            health_check_interval_secs: HEALTH_CHECK_INTERVAL_SECS,
            unhealthy_after_secs: UNHEALTHY_AFTER_SECS,
            default_max_retries: 3,
            scaling: ScalingPolicy::default(),
            breaker_defaults: BreakerDefaults::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let config = Self {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "vodworks-scheduler".to_string()),
            worker_pool_size: env_parse("WORKER_POOL_SIZE", WORKER_POOL_SIZE),
            max_concurrent_tasks: env_parse("MAX_CONCURRENT_TASKS", MAX_CONCURRENT_TASKS),
            max_queue_size: env_parse("MAX_QUEUE_SIZE", MAX_QUEUE_SIZE),
            task_timeout_secs: env_parse("TASK_TIMEOUT_SECS", TASK_TIMEOUT_SECS),
            health_check_interval_secs: env_parse(
                "HEALTH_CHECK_INTERVAL_SECS",
                HEALTH_CHECK_INTERVAL_SECS,
            ),
            unhealthy_after_secs: env_parse("UNHEALTHY_AFTER_SECS", UNHEALTHY_AFTER_SECS),
            default_max_retries: env_parse("DEFAULT_MAX_RETRIES", 3),
            scaling: ScalingPolicy {
                min_workers: env_parse("MIN_WORKERS", MIN_WORKERS),
                max_workers: env_parse("MAX_WORKERS", MAX_WORKERS),
                scale_up_threshold: env_parse("SCALE_UP_THRESHOLD", SCALE_UP_THRESHOLD),
                scale_down_threshold: env_parse("SCALE_DOWN_THRESHOLD", SCALE_DOWN_THRESHOLD),
                check_interval_ms: env_parse("SCALE_CHECK_INTERVAL_MS", SCALE_CHECK_INTERVAL_MS),
            },
            breaker_defaults: BreakerDefaults {
                failure_threshold: env_parse("BREAKER_FAILURE_THRESHOLD", BREAKER_FAILURE_THRESHOLD),
                success_threshold: env_parse("BREAKER_SUCCESS_THRESHOLD", BREAKER_SUCCESS_THRESHOLD),
                timeout_secs: env_parse("BREAKER_TIMEOUT_SECS", BREAKER_TIMEOUT_SECS),
                max_requests: env_parse("BREAKER_MAX_REQUESTS", BREAKER_MAX_REQUESTS),
                failure_rate_threshold: env_parse(
                    "BREAKER_FAILURE_RATE_THRESHOLD",
                    BREAKER_FAILURE_RATE_THRESHOLD,
                ),
                window_secs: env_parse("BREAKER_WINDOW_SECS", BREAKER_WINDOW_SECS),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.scaling.min_workers == 0 {
            return Err(anyhow::anyhow!("MIN_WORKERS must be at least 1"));
        }
        if self.scaling.max_workers < self.scaling.min_workers {
            return Err(anyhow::anyhow!(
                "MAX_WORKERS ({}) must be >= MIN_WORKERS ({})",
                self.scaling.max_workers,
                self.scaling.min_workers
            ));
        }
        if self.worker_pool_size < self.scaling.min_workers
            || self.worker_pool_size > self.scaling.max_workers
        {
            return Err(anyhow::anyhow!(
                "WORKER_POOL_SIZE ({}) must sit within [MIN_WORKERS, MAX_WORKERS]",
                self.worker_pool_size
            ));
        }
        if self.max_queue_size == 0 {
            return Err(anyhow::anyhow!("MAX_QUEUE_SIZE must be at least 1"));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("MAX_CONCURRENT_TASKS must be at least 1"));
        }
        if self.scaling.scale_up_threshold <= 0.0 || self.scaling.scale_down_threshold <= 0.0 {
            return Err(anyhow::anyhow!("scaling thresholds must be positive"));
        }
        if self.scaling.scale_down_threshold >= self.scaling.scale_up_threshold {
            return Err(anyhow::anyhow!(
                "SCALE_DOWN_THRESHOLD must be below SCALE_UP_THRESHOLD"
            ));
        }
        if self.scaling.check_interval_ms == 0 {
            return Err(anyhow::anyhow!("SCALE_CHECK_INTERVAL_MS must be positive"));
        }
        if self.breaker_defaults.failure_threshold == 0
            || self.breaker_defaults.success_threshold == 0
        {
            return Err(anyhow::anyhow!("breaker thresholds must be at least 1"));
        }
        if self.breaker_defaults.failure_rate_threshold <= 0.0
            || self.breaker_defaults.failure_rate_threshold > 1.0
        {
            return Err(anyhow::anyhow!(
                "BREAKER_FAILURE_RATE_THRESHOLD must be in (0, 1]"
            ));
        }
        if self.breaker_defaults.max_requests == 0 {
            return Err(anyhow::anyhow!("BREAKER_MAX_REQUESTS must be at least 1"));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn unhealthy_after(&self) -> Duration {
        Duration::from_secs(self.unhealthy_after_secs)
    }
}
