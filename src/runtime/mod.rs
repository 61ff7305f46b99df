use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RuntimeError;

pub mod docker;
pub use docker::DockerRuntime;

#[cfg(test)]
pub mod fake;

/// Address of a container on one network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub ip_address: String,
    pub mac_address: String,
}

/// A running container as reported by the runtime's list call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSummary {
    pub id: String,
    pub image: String,
    pub names: Vec<String>,
    pub status: String,
    pub state: String,
    pub created: DateTime<Utc>,
    /// Network mode from the host config (`bridge`, `host`, a network name).
    pub network_mode: Option<String>,
    pub networks: BTreeMap<String, NetworkAttachment>,
}

/// The parts of an inspect response the steward cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerDetails {
    pub name: String,
    pub state: String,
    pub started: Option<DateTime<Utc>>,
    /// Top-level addresses (legacy default bridge fields).
    pub default_attachment: NetworkAttachment,
}

/// One resource-usage sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_total: u64,
    pub system_total: u64,
    /// Previous reading, when the runtime supplies one.
    pub precpu_total: Option<u64>,
    pub presystem_total: Option<u64>,
    pub online_cpus: u64,
    pub memory_usage_bytes: u64,
}

impl ResourceSample {
    /// CPU usage in percent of one core, times online CPUs.
    pub fn cpu_percent(&self) -> f64 {
        let (cpu_delta, system_delta) = match (self.precpu_total, self.presystem_total) {
            (Some(pre_cpu), Some(pre_system)) if pre_system > 0 => (
                self.cpu_total.saturating_sub(pre_cpu),
                self.system_total.saturating_sub(pre_system),
            ),
            _ => (self.cpu_total, self.system_total),
        };
        if system_delta == 0 {
            return 0.0;
        }
        (cpu_delta as f64 / system_delta as f64) * self.online_cpus as f64 * 100.0
    }

    pub fn memory_mib(&self) -> f64 {
        self.memory_usage_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists running containers.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, RuntimeError>;

    /// Takes exactly one non-streaming resource-usage sample.
    async fn stats_once(&self, id: &str) -> Result<ResourceSample, RuntimeError>;

    async fn restart(&self, id: &str, stop_timeout: Duration) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_percent_uses_deltas_when_available() {
        let sample = ResourceSample {
            cpu_total: 300,
            system_total: 2_000,
            precpu_total: Some(100),
            presystem_total: Some(1_000),
            online_cpus: 4,
            memory_usage_bytes: 0,
        };
        assert!((sample.cpu_percent() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn cpu_percent_falls_back_to_totals() {
        let sample = ResourceSample {
            cpu_total: 50,
            system_total: 1_000,
            precpu_total: None,
            presystem_total: None,
            online_cpus: 2,
            memory_usage_bytes: 0,
        };
        assert!((sample.cpu_percent() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn cpu_percent_is_zero_without_system_progress() {
        let sample = ResourceSample {
            cpu_total: 50,
            system_total: 1_000,
            precpu_total: Some(50),
            presystem_total: Some(1_000),
            online_cpus: 2,
            memory_usage_bytes: 0,
        };
        assert_eq!(sample.cpu_percent(), 0.0);
    }

    #[test]
    fn memory_is_reported_in_mib() {
        let sample = ResourceSample {
            memory_usage_bytes: 256 * 1024 * 1024,
            ..Default::default()
        };
        assert_eq!(sample.memory_mib(), 256.0);
    }
}
