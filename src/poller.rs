//! State poller.
//!
//! Builds one [`Snapshots`] map per cycle from the runtime.  Listing
//! failures abort the cycle; inspect or stats failures only skip the
//! affected container.

use std::sync::Arc;

use log::{debug, error, warn};
use tokio::sync::mpsc;

use crate::error::RuntimeError;
use crate::runtime::{ContainerDetails, ContainerRuntime, ContainerSummary, NetworkAttachment};
use crate::types::{ContainerSnapshot, Snapshots};

const DEFAULT_BRIDGE: &str = "bridge";
/// Network modes that mean "the default bridge" rather than a named network.
const DEFAULT_MODES: [&str; 2] = [DEFAULT_BRIDGE, "default"];

pub struct StatePoller {
    runtime: Arc<dyn ContainerRuntime>,
    /// Network to read addresses from when a container is attached to it.
    network_name: Option<String>,
}

impl StatePoller {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, network_name: Option<String>) -> Self {
        Self {
            runtime,
            network_name,
        }
    }

    pub async fn poll(&self) -> Result<Snapshots, RuntimeError> {
        let containers = self.runtime.list_containers().await?;
        let mut snapshots = Snapshots::new();

        for summary in containers {
            let details = match self.runtime.inspect(&summary.id).await {
                Ok(d) => d,
                Err(e) => {
                    warn!("Failed to inspect container {}: {}", summary.id, e);
                    continue;
                }
            };
            let sample = match self.runtime.stats_once(&summary.id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("Failed to sample stats for container {}: {}", summary.id, e);
                    continue;
                }
            };

            let name = container_name(&summary, &details);
            let attachment = primary_attachment(&summary, &details, self.network_name.as_deref());
            snapshots.insert(
                name,
                ContainerSnapshot {
                    id: summary.id,
                    image: summary.image,
                    state: if details.state.is_empty() {
                        summary.state
                    } else {
                        details.state
                    },
                    status: summary.status,
                    created: summary.created,
                    started: details.started,
                    cpu_percent: sample.cpu_percent(),
                    memory_mib: sample.memory_mib(),
                    ip_address: attachment.ip_address,
                    mac_address: attachment.mac_address,
                },
            );
        }

        debug!("Poll cycle produced {} snapshots", snapshots.len());
        Ok(snapshots)
    }

    /// Runs one poll cycle on its own task and hands the result to
    /// `results`.  A full queue drops the result instead of waiting.
    pub fn spawn_cycle(self: &Arc<Self>, results: mpsc::Sender<Snapshots>) {
        let poller = Arc::clone(self);
        tokio::spawn(async move {
            match poller.poll().await {
                Ok(snapshots) => {
                    if let Err(e) = results.try_send(snapshots) {
                        warn!("Dropping poll result: {}", e);
                    }
                }
                Err(e) => error!("Failed to list containers: {}", e),
            }
        });
    }
}

fn container_name(summary: &ContainerSummary, details: &ContainerDetails) -> String {
    if !details.name.is_empty() {
        return details.name.clone();
    }
    summary
        .names
        .first()
        .cloned()
        .unwrap_or_else(|| summary.id.clone())
}

/// Picks the address a container is reachable on.  A configured network
/// wins, then the container's own network mode when it names a network
/// other than the default bridge, then any named network over the default
/// bridge, then the inspect-level addresses.
fn primary_attachment(
    summary: &ContainerSummary,
    details: &ContainerDetails,
    preferred: Option<&str>,
) -> NetworkAttachment {
    let networks = &summary.networks;
    preferred
        .and_then(|name| networks.get(name))
        .or_else(|| {
            summary
                .network_mode
                .as_deref()
                .filter(|mode| !DEFAULT_MODES.contains(mode))
                .and_then(|mode| networks.get(mode))
        })
        .or_else(|| {
            networks
                .iter()
                .find(|(name, _)| name.as_str() != DEFAULT_BRIDGE)
                .map(|(_, attachment)| attachment)
        })
        .or_else(|| networks.get(DEFAULT_BRIDGE))
        .cloned()
        .unwrap_or_else(|| details.default_attachment.clone())
}
