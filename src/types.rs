//! Data structures used throughout the steward daemon.
//!
//! A [`ContainerSnapshot`] is produced fresh by every poll cycle and is
//! discarded once reconciled into the store.  The field and entity type
//! names below are the attribute schema shared with every other client
//! of the store, so they must not be renamed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub const CONTAINER_TYPE: &str = "Container";
pub const SERVICE_TYPE: &str = "Service";

/// Attribute names of `Container` and `Service` entities.
pub mod field {
    pub const CONTAINER_NAME: &str = "ContainerName";
    pub const CONTAINER_ID: &str = "ContainerId";
    pub const CONTAINER_IMAGE: &str = "ContainerImage";
    pub const CONTAINER_STATE: &str = "ContainerState";
    pub const CONTAINER_STATUS: &str = "ContainerStatus";
    pub const CREATE_TIME: &str = "CreateTime";
    pub const START_TIME: &str = "StartTime";
    pub const CPU_USAGE: &str = "CPUUsage";
    pub const MEMORY_USAGE: &str = "MemoryUsage";
    pub const IP_ADDRESS: &str = "IPAddress";
    pub const MAC_ADDRESS: &str = "MACAddress";
    pub const RESET_TRIGGER: &str = "ResetTrigger";
    pub const RESTART_CONTAINERS: &str = "RestartContainers";
    pub const IS_LEADER: &str = "IsLeader";
    pub const IS_AVAILABLE: &str = "IsAvailable";
    pub const SERVICE_REFERENCE: &str = "ServiceReference";

    pub const LEADER: &str = "Leader";
    pub const CANDIDATES: &str = "Candidates";
    pub const HEARTBEAT_TRIGGER: &str = "HeartbeatTrigger";
}

/// Point-in-time view of one running container, as seen by a poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSnapshot {
    /// Runtime-assigned container ID.  Changes on every re-creation.
    pub id: String,
    pub image: String,
    /// Lifecycle state as reported by inspect (`running`, `exited`, ...).
    pub state: String,
    /// Human readable status text (`Up 3 minutes`).
    pub status: String,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub cpu_percent: f64,
    pub memory_mib: f64,
    pub ip_address: String,
    pub mac_address: String,
}

/// One poll cycle's result, keyed by container name.
pub type Snapshots = BTreeMap<String, ContainerSnapshot>;

/// Shared "this instance is leader" flag.
///
/// Cloned into every task that must check leadership at the moment it
/// acts.  Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct LeaderGate(Arc<AtomicBool>);

impl LeaderGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leader(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, leader: bool) {
        self.0.store(leader, Ordering::Release);
    }
}

/// Splits a comma separated identifier list, skipping empty tokens.
pub fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_gate_clones_share_state() {
        let gate = LeaderGate::new();
        let other = gate.clone();
        assert!(!other.is_leader());
        gate.set(true);
        assert!(other.is_leader());
        other.set(false);
        assert!(!gate.is_leader());
    }

    #[test]
    fn split_list_skips_empty_tokens() {
        let tokens: Vec<_> = split_list("svc-7,, svc-9 ,").collect();
        assert_eq!(tokens, vec!["svc-7", "svc-9"]);
        assert_eq!(split_list("").count(), 0);
    }
}
