//! The `machineup` runner: global-zone liveness watch for one tenant
//! machine.
//!
//! Each tick lists the node's sandboxes through the platform command
//! (`zoneadm list -p` unless configured otherwise) and fires when the
//! watched machine is absent or not running, clearing when it returns.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use amon_common::{Event, Probe};

const CHECK_INTERVAL_SECS: u64 = 60;

pub async fn run(
    probe: Probe,
    zone_list_cmd: Vec<String>,
    events: mpsc::Sender<Event>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let Some(machine) = probe.machine.clone() else {
        error!(probe = %probe.name, "machineup probe has no machine target; runner stopped.");
        return;
    };
    if zone_list_cmd.is_empty() {
        error!(probe = %probe.name, "Empty zone list command; runner stopped.");
        return;
    }

    let mut was_running: Option<bool> = None;
    let mut ticker = interval(Duration::from_secs(CHECK_INTERVAL_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(probe = %probe.name, machine = %machine, "machineup runner started.");

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!(probe = %probe.name, "machineup runner stopping.");
                break;
            }

            _ = ticker.tick() => {
                let running = match list_running_machines(&zone_list_cmd).await {
                    Ok(running) => running,
                    Err(e) => {
                        warn!(probe = %probe.name, error = %e, "Zone listing failed; skipping check.");
                        continue;
                    }
                };
                let up = running.contains(&machine);
                let transition = match was_running {
                    Some(prev) => prev != up,
                    // First observation only alarms; an initial "up" is
                    // not news.
                    None => !up,
                };
                was_running = Some(up);
                if !transition {
                    debug!(probe = %probe.name, up, "machineup state unchanged.");
                    continue;
                }

                let message = if up {
                    format!("Machine {machine} is back up.")
                } else {
                    format!("Machine {machine} is down.")
                };
                let event =
                    Event::probe_fired(&probe, json!({"message": message, "machine": machine}), up);
                if events.send(event).await.is_err() {
                    warn!(probe = %probe.name, "Event channel closed; machineup runner stopping.");
                    break;
                }
            }
        }
    }
}

/// Parses `zoneadm list -p` style output:
/// `zoneid:zonename:state:zonepath:uuid:brand:ip-type`.
async fn list_running_machines(cmd: &[String]) -> Result<HashSet<String>, String> {
    let output = tokio::process::Command::new(&cmd[0])
        .args(&cmd[1..])
        .output()
        .await
        .map_err(|e| format!("spawn {}: {e}", cmd[0]))?;
    if !output.status.success() {
        return Err(format!("{} exited with {}", cmd[0], output.status));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            match (fields.get(2), fields.get(4)) {
                (Some(&"running"), Some(uuid)) if !uuid.is_empty() => {
                    Some((*uuid).to_string())
                }
                _ => None,
            }
        })
        .collect())
}
