use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::{error, info};

fn default_poll_interval() -> u64 {
    90
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/.smartdc-amon.sock")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// The relay's unix socket inside this sandbox.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Manifest poll interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Platform sandbox-listing command; only consulted by global-zone
    /// probe runners.
    #[serde(default)]
    pub zone_list_cmd: Option<Vec<String>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            poll_interval: default_poll_interval(),
            zone_list_cmd: None,
        }
    }
}

impl AgentConfig {
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = fs::read_to_string(path).map_err(|e| {
            error!(path, error = %e, "Failed to read agent config file.");
            e
        })?;
        let config: AgentConfig = toml::from_str(&raw).map_err(|e| {
            error!(path, error = %e, "Failed to parse agent config file.");
            e
        })?;
        info!(path, socket = %config.socket_path.display(), "Loaded agent config.");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.poll_interval, 90);
        assert_eq!(config.socket_path, default_socket_path());
        assert!(config.zone_list_cmd.is_none());
    }

    #[test]
    fn explicit_values_override() {
        let raw = r#"
            socket_path = "/tmp/amon.sock"
            poll_interval = 15
            zone_list_cmd = ["zoneadm", "list", "-p"]
        "#;
        let config: AgentConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.poll_interval, 15);
        assert_eq!(config.zone_list_cmd.unwrap().len(), 3);
    }
}
