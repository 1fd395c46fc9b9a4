use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info};

use crate::manifest::TargetId;

fn default_poll_interval() -> u64 {
    30
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/run/amon-relay")
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Base URL of the master API.
    pub master_url: String,
    /// This compute node's uuid (the global-zone target).
    pub server_uuid: String,
    /// Tenant sandboxes served by this relay. Populated by the node's
    /// bootstrap tooling.
    #[serde(default)]
    pub machines: Vec<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Manifest poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl RelayConfig {
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = fs::read_to_string(path).map_err(|e| {
            error!(path, error = %e, "Failed to read relay config file.");
            e
        })?;
        let config: RelayConfig = toml::from_str(&raw).map_err(|e| {
            error!(path, error = %e, "Failed to parse relay config file.");
            e
        })?;
        info!(
            path,
            master = %config.master_url,
            machines = config.machines.len(),
            "Loaded relay config."
        );
        Ok(config)
    }

    /// One target per tenant sandbox, plus the global zone.
    pub fn targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = self
            .machines
            .iter()
            .map(TargetId::machine)
            .collect();
        targets.push(TargetId::server(&self.server_uuid));
        targets
    }
}
