use super::{ContainerDetails, ContainerRuntime, ContainerSummary, NetworkAttachment, ResourceSample};
use crate::error::RuntimeError;
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, RestartContainerOptions, Stats, StatsOptions,
};
use bollard::models::EndpointSettings;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::stream::StreamExt;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon using default settings
    /// (`DOCKER_HOST`, else the unix socket on Linux).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                names: c
                    .names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .collect(),
                status: c.status.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
                created: c
                    .created
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                    .unwrap_or_default(),
                network_mode: c.host_config.and_then(|h| h.network_mode),
                networks: c
                    .network_settings
                    .and_then(|s| s.networks)
                    .map(attachments)
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        let detail = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| not_found_or(id, e))?;

        let (state, started) = match detail.state {
            Some(state) => (
                state.status.map(|s| s.to_string()).unwrap_or_default(),
                state.started_at.as_deref().and_then(parse_docker_time),
            ),
            None => (String::new(), None),
        };

        let default_attachment = detail
            .network_settings
            .map(|s| NetworkAttachment {
                ip_address: s.ip_address.unwrap_or_default(),
                mac_address: s.mac_address.unwrap_or_default(),
            })
            .unwrap_or_default();

        Ok(ContainerDetails {
            name: detail
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            state,
            started,
            default_attachment,
        })
    }

    async fn stats_once(&self, id: &str) -> Result<ResourceSample, RuntimeError> {
        let opts = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = self.docker.stats(id, Some(opts));
        match stream.next().await {
            Some(stats) => Ok(sample_from_stats(&stats?)),
            None => Err(RuntimeError::NoStatsSample(id.to_string())),
        }
    }

    async fn restart(&self, id: &str, stop_timeout: Duration) -> Result<(), RuntimeError> {
        debug!("Restarting container {}", id);
        let opts = RestartContainerOptions {
            t: stop_timeout.as_secs() as isize,
        };
        self.docker
            .restart_container(id, Some(opts))
            .await
            .map_err(|e| not_found_or(id, e))?;
        Ok(())
    }
}

fn not_found_or(id: &str, err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::ContainerNotFound(id.to_string()),
        other => other.into(),
    }
}

fn attachments(networks: HashMap<String, EndpointSettings>) -> BTreeMap<String, NetworkAttachment> {
    networks
        .into_iter()
        .map(|(name, endpoint)| {
            (
                name,
                NetworkAttachment {
                    ip_address: endpoint.ip_address.unwrap_or_default(),
                    mac_address: endpoint.mac_address.unwrap_or_default(),
                },
            )
        })
        .collect()
}

fn sample_from_stats(stats: &Stats) -> ResourceSample {
    let cpu = &stats.cpu_stats;
    let precpu = &stats.precpu_stats;
    let online_cpus = cpu
        .online_cpus
        .filter(|n| *n > 0)
        .or_else(|| {
            cpu.cpu_usage
                .percpu_usage
                .as_ref()
                .map(|per_cpu| per_cpu.len() as u64)
        })
        .filter(|n| *n > 0)
        .unwrap_or(1);

    ResourceSample {
        cpu_total: cpu.cpu_usage.total_usage,
        system_total: cpu.system_cpu_usage.unwrap_or_default(),
        precpu_total: precpu
            .system_cpu_usage
            .map(|_| precpu.cpu_usage.total_usage),
        presystem_total: precpu.system_cpu_usage,
        online_cpus,
        memory_usage_bytes: stats.memory_stats.usage.unwrap_or_default(),
    }
}

/// Parses a Docker RFC 3339 timestamp.  The zero time Docker reports for
/// never-started containers maps to `None`.
fn parse_docker_time(raw: &str) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc);
    (parsed.timestamp() > 0).then_some(parsed)
}
