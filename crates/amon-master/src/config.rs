use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{error, info};

fn default_port() -> u16 {
    8080
}

fn default_cache_size() -> usize {
    1000
}

fn default_cache_expiry() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct UfdsConfig {
    pub url: String,
    pub root_dn: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapiConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_size")]
    pub size: usize,
    /// Per-entry TTL in seconds.
    #[serde(default = "default_cache_expiry")]
    pub expiry: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            expiry: default_cache_expiry(),
        }
    }
}

/// One configured notification plugin: the builtin kind implementing it
/// plus kind-specific settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    pub kind: String,
    #[serde(default)]
    pub config: HashMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub ufds: UfdsConfig,
    pub mapi: MapiConfig,
    /// Medium name (the value of `Contact.medium`) to plugin.
    #[serde(default)]
    pub notification_plugins: HashMap<String, PluginConfig>,
    #[serde(default)]
    pub account_cache: CacheConfig,
    #[serde(default)]
    pub probe_cache: CacheConfig,
}

impl MasterConfig {
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let raw = fs::read_to_string(Path::new(path)).map_err(|e| {
            error!(path, error = %e, "Failed to read master config file.");
            e
        })?;
        let config: MasterConfig = toml::from_str(&raw).map_err(|e| {
            error!(path, error = %e, "Failed to parse master config file.");
            e
        })?;
        info!(path, port = config.port, "Loaded master config.");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let raw = r#"
            [ufds]
            url = "ldaps://ufds.example.com"
            root_dn = "cn=root"
            password = "secret"

            [mapi]
            url = "https://mapi.example.com"
            username = "admin"
            password = "secret"
        "#;
        let config: MasterConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.account_cache.size, 1000);
        assert_eq!(config.probe_cache.expiry, 300);
        assert!(config.notification_plugins.is_empty());
    }

    #[test]
    fn plugin_table_parses() {
        let raw = r#"
            [ufds]
            url = "ldap://127.0.0.1:1389"
            root_dn = "cn=root"
            password = "secret"

            [mapi]
            url = "http://127.0.0.1:8070"
            username = "admin"
            password = "secret"

            [notification_plugins.email]
            kind = "webhook"
            config = { timeout_secs = 5 }
        "#;
        let config: MasterConfig = toml::from_str(raw).unwrap();
        let email = &config.notification_plugins["email"];
        assert_eq!(email.kind, "webhook");
        assert_eq!(
            email.config["timeout_secs"],
            toml::Value::Integer(5)
        );
    }
}
