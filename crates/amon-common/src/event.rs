//! The event wire format carried from agent to relay to master.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::Probe;

/// The only wire version this implementation speaks.
pub const EVENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Emitted by a probe instance on an agent.
    Probe,
    /// Synthesized by the master's fake-fault path; same dispatch route.
    Fake,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventProbe {
    pub user: String,
    pub monitor: String,
    pub name: String,
    #[serde(rename = "type")]
    pub probe_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub v: u32,
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub user: String,
    pub monitor: String,
    /// Milliseconds since the epoch.
    pub time: i64,
    #[serde(default)]
    pub clear: bool,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<EventProbe>,
}

impl Event {
    /// An event fired (or cleared) by a probe instance.
    pub fn probe_fired(probe: &Probe, data: Value, clear: bool) -> Self {
        Self {
            v: EVENT_VERSION,
            uuid: Uuid::new_v4().to_string(),
            kind: EventKind::Probe,
            user: probe.user.clone(),
            monitor: probe.monitor.clone(),
            time: Utc::now().timestamp_millis(),
            clear,
            data,
            probe: Some(EventProbe {
                user: probe.user.clone(),
                monitor: probe.monitor.clone(),
                name: probe.name.clone(),
                probe_type: probe.probe_type.clone(),
            }),
        }
    }

    /// A synthetic event for exercising the dispatch path end to end.
    pub fn fake(user: &str, monitor: &str, clear: bool) -> Self {
        Self {
            v: EVENT_VERSION,
            uuid: Uuid::new_v4().to_string(),
            kind: EventKind::Fake,
            user: user.to_string(),
            monitor: monitor.to_string(),
            time: Utc::now().timestamp_millis(),
            clear,
            data: json!({
                "message": format!("Fake {} for monitor \"{monitor}\".",
                    if clear { "clear" } else { "fault" }),
            }),
            probe: None,
        }
    }

    /// Envelope sanity checks applied at every ingest hop.
    pub fn validate(&self) -> Result<()> {
        if self.v != EVENT_VERSION {
            return Err(Error::invalid_argument(format!(
                "unsupported event version {}",
                self.v
            )));
        }
        if Uuid::parse_str(&self.uuid).is_err() {
            return Err(Error::invalid_argument(format!(
                "event uuid \"{}\" is not a UUID",
                self.uuid
            )));
        }
        Ok(())
    }

    /// The human line given to notification plugins alongside the raw
    /// event.
    pub fn render_message(&self) -> String {
        let detail = self
            .data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("probe event");
        if self.clear {
            format!("[Amon clear] monitor \"{}\": {detail}", self.monitor)
        } else {
            format!("[Amon alarm] monitor \"{}\": {detail}", self.monitor)
        }
    }
}
