//! Health levels shared by adapters, the registry and the sync service

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall health of an adapter or service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Reachable but with open breakers or partial failures
    Degraded,
    /// Not operational
    Unhealthy,
}

impl HealthStatus {
    /// Whether traffic should still be routed to the component
    pub fn is_operational(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Unhealthy => "UNHEALTHY",
        };
        f.write_str(name)
    }
}
