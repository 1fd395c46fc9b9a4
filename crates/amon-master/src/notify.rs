//! Notification plugins: how a dispatched event reaches a contact.
//!
//! Plugins are instantiated once at startup from configuration into a
//! registry keyed by medium name (the value of `Contact.medium`). A
//! plugin must be safe for concurrent `notify` calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use amon_common::{Error as AmonError, Event};

use crate::config::PluginConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification rejected: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one event. `address` is the contact's opaque `data`
    /// field; `message` is the rendered human line.
    async fn notify(&self, event: &Event, address: &str, message: &str)
        -> Result<(), NotifyError>;
}

/// POSTs the rendered message plus the raw event to the contact's URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client"),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        event: &Event,
        address: &str,
        message: &str,
    ) -> Result<(), NotifyError> {
        let body = json!({
            "message": message,
            "event": event,
        });
        let response = self.client.post(address).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected(format!(
                "webhook {address} returned {status}: {detail}"
            )));
        }
        Ok(())
    }
}

/// Writes the rendered line to the master's own log. Deployment
/// stand-in for media with no wired plugin, and the default test medium.
pub struct StdoutNotifier;

#[async_trait]
impl Notifier for StdoutNotifier {
    async fn notify(
        &self,
        event: &Event,
        address: &str,
        message: &str,
    ) -> Result<(), NotifyError> {
        info!(
            event_uuid = %event.uuid,
            monitor = %event.monitor,
            address,
            "NOTIFY: {message}"
        );
        Ok(())
    }
}

const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Default)]
pub struct NotifierRegistry {
    media: HashMap<String, Arc<dyn Notifier>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from the `notification_plugins` config table,
    /// on top of the builtin `webhook` and `stdout` media.
    pub fn from_config(
        plugins: &HashMap<String, PluginConfig>,
    ) -> Result<Self, AmonError> {
        let mut registry = Self::new();
        registry.register(
            "webhook",
            Arc::new(WebhookNotifier::new(Duration::from_secs(
                DEFAULT_WEBHOOK_TIMEOUT_SECS,
            ))),
        );
        registry.register("stdout", Arc::new(StdoutNotifier));

        for (medium, plugin) in plugins {
            let notifier: Arc<dyn Notifier> = match plugin.kind.as_str() {
                "webhook" => {
                    let timeout = plugin
                        .config
                        .get("timeout_secs")
                        .and_then(toml::Value::as_integer)
                        .unwrap_or(DEFAULT_WEBHOOK_TIMEOUT_SECS as i64);
                    Arc::new(WebhookNotifier::new(Duration::from_secs(timeout.max(1) as u64)))
                }
                "stdout" => Arc::new(StdoutNotifier),
                other => {
                    return Err(AmonError::internal(format!(
                        "notification plugin \"{medium}\" names unknown kind \"{other}\""
                    )));
                }
            };
            registry.register(medium, notifier);
        }
        Ok(registry)
    }

    pub fn register(&mut self, medium: &str, notifier: Arc<dyn Notifier>) {
        self.media.insert(medium.to_string(), notifier);
    }

    pub fn get(&self, medium: &str) -> Option<&Arc<dyn Notifier>> {
        self.media.get(medium)
    }
}
