//! The agent's manifest update loop and the event pump back to the
//! relay.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use amon_common::Event;

use crate::reconcile::ProbeManager;
use crate::relay_client::RelayClient;

/// HEADs the relay each tick; a changed `Content-MD5` triggers a GET
/// and a reconcile. The hash recorded is the one the body was actually
/// served under, so a race between HEAD and GET self-corrects on the
/// next tick.
pub async fn run_update_loop(
    client: &RelayClient,
    manager: &mut ProbeManager,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last_md5: Option<String> = None;
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_secs = poll_interval.as_secs(), "Manifest update loop started.");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                info!("Manifest update loop stopping.");
                manager.stop_all();
                break;
            }

            _ = ticker.tick() => {
                let head_md5 = match client.head_agent_probes().await {
                    Ok(md5) => md5,
                    Err(e) => {
                        warn!(error = %e, "Manifest HEAD failed; keeping current probe set.");
                        continue;
                    }
                };
                if last_md5.as_deref() == Some(head_md5.as_str()) {
                    debug!("Manifest unchanged.");
                    continue;
                }

                match client.get_agent_probes().await {
                    Ok((manifest, body_md5)) => {
                        info!(md5 = %body_md5, probes = manifest.len(), "Manifest changed; reconciling.");
                        manager.reconcile(&manifest);
                        last_md5 = Some(body_md5);
                    }
                    Err(e) => {
                        warn!(error = %e, "Manifest GET failed; keeping current probe set.");
                    }
                }
            }
        }
    }
}

/// Drains probe events to the relay. Delivery is best-effort at this
/// hop; the relay owns retries toward the master.
pub async fn run_event_pump(client: &RelayClient, mut events: mpsc::Receiver<Event>) {
    while let Some(event) = events.recv().await {
        match client.post_event(&event).await {
            Ok(()) => {
                debug!(event_uuid = %event.uuid, monitor = %event.monitor, "Event submitted to relay.");
            }
            Err(e) => {
                warn!(event_uuid = %event.uuid, error = %e, "Event submission failed; dropping.");
            }
        }
    }
}
