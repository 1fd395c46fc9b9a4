use serde_json::{json, Value};

use crate::dn;
use crate::error::{Error, Result};
use crate::model::{body_opt_string, body_string, validate_name, validate_uuid, DirEntry};
use crate::probes::ProbeTypeRegistry;

pub const OBJECTCLASS: &str = "amonprobe";

/// One check instance: a probe type, a target (exactly one of a tenant
/// machine or a compute node), and the type's configuration.
///
/// `global` is derived from the probe type, never client-supplied: a
/// `run_in_global` type is executed in the node's privileged zone
/// regardless of the target.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub user: String,
    pub monitor: String,
    pub name: String,
    pub probe_type: String,
    pub machine: Option<String>,
    pub server: Option<String>,
    pub config: Option<Value>,
    pub global: bool,
}

impl Probe {
    pub fn from_public(
        user: &str,
        monitor: &str,
        name: &str,
        body: &Value,
        registry: &ProbeTypeRegistry,
    ) -> Result<Self> {
        validate_uuid("user", user)?;
        validate_name("monitor name", monitor)?;
        validate_name("probe name", name)?;

        let machine = body_opt_string(body, "machine")?;
        let server = body_opt_string(body, "server")?;
        match (&machine, &server) {
            (Some(_), Some(_)) => {
                return Err(Error::invalid_argument(
                    "only one of \"machine\" or \"server\" may be set",
                ));
            }
            (None, None) => {
                return Err(Error::missing_parameter(
                    "one of \"machine\" or \"server\" is required",
                ));
            }
            _ => {}
        }
        if let Some(machine) = &machine {
            validate_uuid("machine", machine)?;
        }
        if let Some(server) = &server {
            validate_uuid("server", server)?;
        }

        let probe_type = body_string(body, "type")?;
        let plugin = registry.get(&probe_type).ok_or_else(|| {
            Error::invalid_argument(format!("probe type \"{probe_type}\" is unknown"))
        })?;

        let config = match body.get("config") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.clone()),
        };
        plugin
            .validate_config(config.as_ref())
            .map_err(Error::invalid_argument)?;

        Ok(Self {
            user: user.to_string(),
            monitor: monitor.to_string(),
            name: name.to_string(),
            probe_type,
            machine,
            server,
            config,
            global: plugin.run_in_global(),
        })
    }

    pub fn from_entry(entry: &DirEntry) -> Result<Self> {
        if !entry.has_objectclass(OBJECTCLASS) {
            return Err(Error::internal(format!(
                "record \"{}\" is not an {OBJECTCLASS}",
                entry.dn
            )));
        }
        let (user, monitor, name) = dn::parse_probe_dn(&entry.dn)?;
        let machine = entry.first("machine").map(str::to_string);
        let server = entry.first("server").map(str::to_string);
        if machine.is_some() == server.is_some() {
            return Err(Error::internal(format!(
                "record \"{}\" must carry exactly one of \"machine\" or \"server\"",
                entry.dn
            )));
        }
        let config = match entry.first("config") {
            None => None,
            Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                Error::internal(format!("record \"{}\" has corrupt config: {e}", entry.dn))
            })?),
        };
        let global = match entry.first("global") {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(Error::internal(format!(
                    "record \"{}\" has corrupt global flag \"{other}\"",
                    entry.dn
                )));
            }
        };
        Ok(Self {
            user,
            monitor,
            name,
            probe_type: entry.require("type")?.to_string(),
            machine,
            server,
            config,
            global,
        })
    }

    pub fn dn(&self) -> String {
        dn::probe_dn(&self.user, &self.monitor, &self.name)
    }

    pub fn parent_dn(&self) -> String {
        dn::monitor_dn(&self.user, &self.monitor)
    }

    /// Public serialization; `internal` additionally exposes `global`,
    /// which agents need and clients never see.
    pub fn serialize(&self, internal: bool) -> Value {
        let mut out = json!({
            "user": self.user,
            "monitor": self.monitor,
            "name": self.name,
            "type": self.probe_type,
        });
        let map = out.as_object_mut().unwrap();
        if let Some(machine) = &self.machine {
            map.insert("machine".into(), json!(machine));
        }
        if let Some(server) = &self.server {
            map.insert("server".into(), json!(server));
        }
        if let Some(config) = &self.config {
            map.insert("config".into(), config.clone());
        }
        if internal {
            map.insert("global".into(), json!(self.global));
        }
        out
    }

    pub fn to_attrs(&self) -> Vec<(String, Vec<String>)> {
        let mut attrs = vec![
            ("objectclass".to_string(), vec![OBJECTCLASS.to_string()]),
            ("type".to_string(), vec![self.probe_type.clone()]),
            ("global".to_string(), vec![self.global.to_string()]),
        ];
        if let Some(machine) = &self.machine {
            attrs.push(("machine".to_string(), vec![machine.clone()]));
        }
        if let Some(server) = &self.server {
            attrs.push(("server".to_string(), vec![server.clone()]));
        }
        if let Some(config) = &self.config {
            attrs.push(("config".to_string(), vec![config.to_string()]));
        }
        attrs
    }
}
