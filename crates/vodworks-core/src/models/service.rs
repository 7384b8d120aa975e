use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Conventional metadata key carrying the instance weight for weighted
/// round-robin selection.
pub const METADATA_WEIGHT: &str = "weight";

/// Conventional metadata key carrying the current connection count for
/// least-connections selection.
pub const METADATA_CONNECTIONS: &str = "connections";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Unknown,
    Healthy,
    Unhealthy,
    Draining,
}

impl Display for InstanceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            InstanceStatus::Unknown => write!(f, "unknown"),
            InstanceStatus::Healthy => write!(f, "healthy"),
            InstanceStatus::Unhealthy => write!(f, "unhealthy"),
            InstanceStatus::Draining => write!(f, "draining"),
        }
    }
}

/// HTTP health check for a registered instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub url: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

/// One registered instance of a named service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub health_check: Option<HealthCheckSpec>,
    pub status: InstanceStatus,
    pub last_seen: DateTime<Utc>,
}

impl ServiceInstance {
    pub fn is_healthy(&self) -> bool {
        self.status == InstanceStatus::Healthy
    }

    /// Weight from metadata; absent or unparsable reads as 1.
    pub fn weight(&self) -> u32 {
        self.metadata
            .get(METADATA_WEIGHT)
            .and_then(|w| w.parse().ok())
            .unwrap_or(1)
            .max(1)
    }

    /// Active connection count from metadata; absent reads as 0.
    pub fn connections(&self) -> u64 {
        self.metadata
            .get(METADATA_CONNECTIONS)
            .and_then(|c| c.parse().ok())
            .unwrap_or(0)
    }
}
