//! Probe runner implementations and the factory that spawns them.
//!
//! A runner is one spawned task per probe instance, shut down through a
//! oneshot channel and emitting events through the shared channel back
//! to the relay.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use amon_common::{Event, LogScanConfig, Probe};

pub mod logscan;
pub mod machineup;

fn default_zone_list_cmd() -> Vec<String> {
    vec!["zoneadm".into(), "list".into(), "-p".into()]
}

/// Agent-level facts runners may need beyond their own probe config.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    /// Platform command listing sandboxes (global agent only).
    pub zone_list_cmd: Vec<String>,
}

impl Default for RunnerContext {
    fn default() -> Self {
        Self {
            zone_list_cmd: default_zone_list_cmd(),
        }
    }
}

/// Spawns the runner for one probe. An unknown type or unparsable
/// config is a fatal instance error, reported to the caller; it never
/// takes the agent down.
pub fn spawn_runner(
    probe: Probe,
    context: &RunnerContext,
    events: mpsc::Sender<Event>,
) -> Result<(JoinHandle<()>, oneshot::Sender<()>), String> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = match probe.probe_type.as_str() {
        "logscan" => {
            let config = LogScanConfig::parse(probe.config.as_ref())?;
            tokio::spawn(logscan::run(probe, config, events, shutdown_rx))
        }
        "machineup" => tokio::spawn(machineup::run(
            probe,
            context.zone_list_cmd.clone(),
            events,
            shutdown_rx,
        )),
        other => return Err(format!("probe type \"{other}\" has no runner")),
    };
    Ok((handle, shutdown_tx))
}
