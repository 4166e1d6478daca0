//! Telemetry snapshot sent on the `stats` channel
//!
//! Field names mirror the JSON object existing dashboards consume. A metric
//! that could not be sampled is reported as its zero/default value; the
//! snapshot as a whole is still emitted.

use serde::{Deserialize, Serialize};

/// One periodic metrics sample from the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TelemetrySnapshot {
    /// CPU utilization percentage (0-100)
    pub cpu: f64,
    pub memory: MemoryUsage,
    /// Root filesystem usage
    pub disk: DiskUsage,
    /// Primary temperature sensor, degrees Celsius
    pub temperature: f32,
    /// Process host uptime in seconds
    pub uptime: u64,
    pub network: NetworkIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MemoryUsage {
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DiskUsage {
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIdentity {
    /// Local (LAN) address, "unknown" when no interface is up
    pub ip: String,
    pub hostname: String,
}

impl Default for NetworkIdentity {
    fn default() -> Self {
        Self {
            ip: "unknown".to_string(),
            hostname: "unknown".to_string(),
        }
    }
}
