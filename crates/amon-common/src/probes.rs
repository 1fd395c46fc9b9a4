//! The probe-type plugin registry.
//!
//! A probe type contributes three things to the core: a name, whether its
//! instances must run in the node's global zone, and config validation.
//! The master consults the registry when a probe is written; agents use
//! the same config parsing when instantiating runners. New types are
//! added by registering a value, not by subclassing.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub trait ProbeType: Send + Sync {
    fn name(&self) -> &'static str;

    /// True if instances run in the node's privileged (global) zone
    /// rather than inside the tenant sandbox.
    fn run_in_global(&self) -> bool {
        false
    }

    /// Validates a probe's `config` object. The error string is carried
    /// to the caller inside an `InvalidArgument`.
    fn validate_config(&self, config: Option<&Value>) -> Result<(), String>;
}

#[derive(Clone, Default)]
pub struct ProbeTypeRegistry {
    types: HashMap<&'static str, Arc<dyn ProbeType>>,
}

impl ProbeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with the builtin probe types.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LogScan));
        registry.register(Arc::new(MachineUp));
        registry
    }

    pub fn register(&mut self, probe_type: Arc<dyn ProbeType>) {
        self.types.insert(probe_type.name(), probe_type);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ProbeType>> {
        self.types.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.keys().copied()
    }
}

fn default_threshold() -> u32 {
    1
}

fn default_period() -> u64 {
    60
}

/// Config for the `logscan` type: watch a file for appended lines
/// matching a pattern, fire once `threshold` matches accumulate within
/// one `period`-second scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LogScanConfig {
    pub path: String,
    pub regex: String,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_period")]
    pub period: u64,
}

impl LogScanConfig {
    pub fn parse(config: Option<&Value>) -> Result<Self, String> {
        let config = match config {
            Some(v) if v.is_object() => v,
            Some(_) => return Err("config must be an object".into()),
            None => return Err("config is required".into()),
        };
        let parsed: LogScanConfig =
            serde_json::from_value(config.clone()).map_err(|e| format!("config: {e}"))?;
        regex::Regex::new(&parsed.regex)
            .map_err(|e| format!("config.regex does not compile: {e}"))?;
        if parsed.threshold < 1 {
            return Err("config.threshold must be >= 1".into());
        }
        if parsed.period < 1 {
            return Err("config.period must be >= 1".into());
        }
        Ok(parsed)
    }
}

struct LogScan;

impl ProbeType for LogScan {
    fn name(&self) -> &'static str {
        "logscan"
    }

    fn validate_config(&self, config: Option<&Value>) -> Result<(), String> {
        LogScanConfig::parse(config).map(|_| ())
    }
}

/// `machineup` watches a tenant machine's liveness from the global zone.
/// It takes no configuration; the probe's target is the watched machine.
struct MachineUp;

impl ProbeType for MachineUp {
    fn name(&self) -> &'static str {
        "machineup"
    }

    fn run_in_global(&self) -> bool {
        true
    }

    fn validate_config(&self, config: Option<&Value>) -> Result<(), String> {
        match config {
            None => Ok(()),
            Some(Value::Object(map)) if map.is_empty() => Ok(()),
            Some(_) => Err("machineup probes take no config".into()),
        }
    }
}
