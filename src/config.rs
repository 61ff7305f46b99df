use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Network whose addresses are published, when a container joins it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
    pub poll_interval_secs: u64,
    pub lease_check_interval_secs: u64,
    pub lease_timeout_secs: u64,
    pub restart_grace_secs: u64,
    pub restart_stop_timeout_secs: u64,
    pub snapshot_queue_capacity: usize,
    pub tick_millis: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_name: None,
            poll_interval_secs: 15,
            lease_check_interval_secs: 5,
            lease_timeout_secs: 15,
            restart_grace_secs: 60,
            restart_stop_timeout_secs: 10,
            snapshot_queue_capacity: 10,
            tick_millis: 100,
            seed_file: None,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("steward.toml"))
                .merge(Json::file("steward.json"))
                .merge(Env::prefixed("STEWARD_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (key, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("lease_check_interval_secs", self.lease_check_interval_secs),
            ("lease_timeout_secs", self.lease_timeout_secs),
            ("tick_millis", self.tick_millis),
            ("snapshot_queue_capacity", self.snapshot_queue_capacity as u64),
        ] {
            if value == 0 {
                anyhow::bail!("Invalid configuration: {} must be greater than zero", key);
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lease_check_interval(&self) -> Duration {
        Duration::from_secs(self.lease_check_interval_secs)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_secs(self.restart_grace_secs)
    }

    pub fn restart_stop_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_stop_timeout_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_figment(Figment::from(Serialized::defaults(Config::default())))
            .unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.restart_grace(), Duration::from_secs(60));
        assert_eq!(config.snapshot_queue_capacity, 10);
    }

    #[test]
    fn env_and_file_layers_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file("steward.toml", "poll_interval_secs = 5\nnetwork_name = \"backend\"")?;
            jail.set_env("STEWARD_POLL_INTERVAL_SECS", "7");
            jail.set_env("STEWARD_SEED_FILE", "/etc/steward/seed.json");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.poll_interval_secs, 7);
            assert_eq!(config.network_name.as_deref(), Some("backend"));
            assert_eq!(config.seed_file, Some(PathBuf::from("/etc/steward/seed.json")));
            Ok(())
        });
    }

    #[test]
    fn zero_intervals_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("STEWARD_SNAPSHOT_QUEUE_CAPACITY", "0");
            assert!(Config::load().is_err());
            Ok(())
        });
    }
}
