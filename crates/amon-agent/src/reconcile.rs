//! Reconciling the running probe set against a manifest snapshot.
//!
//! A snapshot is processed to completion before the next one is looked
//! at: probes that vanished are stopped, new ones are started, and ones
//! whose serialized form changed are restarted. An instance that fails
//! to construct is left `Stopped` and is not retried until its manifest
//! entry changes.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use amon_common::{Event, Probe, ProbeTypeRegistry};

use crate::probes::{spawn_runner, RunnerContext};

/// Probe instances are keyed by identity, not content; a config change
/// is a restart of the same instance key.
pub type ProbeKey = (String, String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Constructed from the manifest, not yet spawned.
    Pending,
    Running,
    /// Terminal for this instance (removed, shut down, or fatally
    /// failed).
    Stopped,
}

struct Instance {
    manifest_form: Value,
    state: InstanceState,
    handle: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub started: usize,
    pub stopped: usize,
    pub restarted: usize,
    pub unchanged: usize,
    pub failed: usize,
}

pub struct ProbeManager {
    registry: ProbeTypeRegistry,
    context: RunnerContext,
    events: mpsc::Sender<Event>,
    instances: HashMap<ProbeKey, Instance>,
}

fn manifest_key(entry: &Value) -> Option<ProbeKey> {
    let field = |name: &str| entry.get(name)?.as_str().map(str::to_string);
    Some((field("user")?, field("monitor")?, field("name")?))
}

fn probe_from_manifest(entry: &Value, registry: &ProbeTypeRegistry) -> Result<Probe, String> {
    let (user, monitor, name) =
        manifest_key(entry).ok_or_else(|| "entry has no identity fields".to_string())?;
    Probe::from_public(&user, &monitor, &name, entry, registry).map_err(|e| e.to_string())
}

impl ProbeManager {
    pub fn new(context: RunnerContext, events: mpsc::Sender<Event>) -> Self {
        Self {
            registry: ProbeTypeRegistry::builtin(),
            context,
            events,
            instances: HashMap::new(),
        }
    }

    /// Applies one manifest snapshot.
    pub fn reconcile(&mut self, manifest: &[Value]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let mut desired: HashMap<ProbeKey, &Value> = HashMap::new();
        for entry in manifest {
            match manifest_key(entry) {
                Some(key) => {
                    desired.insert(key, entry);
                }
                None => {
                    warn!("Manifest entry without identity fields; skipping.");
                }
            }
        }

        // Stop instances that are no longer wanted.
        let dropped: Vec<ProbeKey> = self
            .instances
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in dropped {
            self.stop_instance(&key);
            summary.stopped += 1;
        }

        // Start new instances, restart changed ones.
        for (key, entry) in desired {
            let current = self.instances.get(&key);
            let unchanged = matches!(current, Some(instance) if instance.manifest_form == *entry);
            let existed = current.is_some();
            if unchanged {
                summary.unchanged += 1;
                continue;
            }
            if existed {
                self.stop_instance(&key);
            }
            if self.start_instance(key, entry.clone()) {
                if existed {
                    summary.restarted += 1;
                } else {
                    summary.started += 1;
                }
            } else {
                summary.failed += 1;
            }
        }

        info!(
            started = summary.started,
            stopped = summary.stopped,
            restarted = summary.restarted,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "Reconciled manifest."
        );
        summary
    }

    fn start_instance(&mut self, key: ProbeKey, manifest_form: Value) -> bool {
        let mut instance = Instance {
            manifest_form,
            state: InstanceState::Pending,
            handle: None,
            shutdown: None,
        };
        let started = match probe_from_manifest(&instance.manifest_form, &self.registry) {
            Ok(probe) => match spawn_runner(probe, &self.context, self.events.clone()) {
                Ok((handle, shutdown)) => {
                    instance.state = InstanceState::Running;
                    instance.handle = Some(handle);
                    instance.shutdown = Some(shutdown);
                    true
                }
                Err(e) => {
                    warn!(probe = %key.2, monitor = %key.1, error = %e, "Probe runner failed to start.");
                    instance.state = InstanceState::Stopped;
                    false
                }
            },
            Err(e) => {
                warn!(probe = %key.2, monitor = %key.1, error = %e, "Manifest entry is not a runnable probe.");
                instance.state = InstanceState::Stopped;
                false
            }
        };
        // A failed instance stays on file so an unchanged manifest does
        // not retry it.
        self.instances.insert(key, instance);
        started
    }

    fn stop_instance(&mut self, key: &ProbeKey) {
        if let Some(instance) = self.instances.remove(key) {
            if let Some(shutdown) = instance.shutdown {
                if shutdown.send(()).is_err() {
                    warn!(probe = %key.2, "Runner already gone at shutdown.");
                }
            }
            // The runner drains on its own; the handle is not awaited.
            drop(instance.handle);
        }
    }

    pub fn stop_all(&mut self) {
        let keys: Vec<ProbeKey> = self.instances.keys().cloned().collect();
        for key in keys {
            self.stop_instance(&key);
        }
    }

    pub fn state_of(&self, key: &ProbeKey) -> Option<InstanceState> {
        self.instances.get(key).map(|i| i.state)
    }

    pub fn running_count(&self) -> usize {
        self.instances
            .values()
            .filter(|i| i.state == InstanceState::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const USER: &str = "11111111-2222-3333-4444-555555555555";
    const MACHINE: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";

    fn manager() -> (ProbeManager, mpsc::Receiver<Event>) {
        let (events_tx, events_rx) = mpsc::channel(8);
        (ProbeManager::new(RunnerContext::default(), events_tx), events_rx)
    }

    fn logscan_entry(name: &str, path: &str) -> Value {
        json!({
            "user": USER,
            "monitor": "whistle",
            "name": name,
            "type": "logscan",
            "machine": MACHINE,
            "config": {"path": path, "regex": "tweet", "threshold": 1, "period": 60},
            "global": false,
        })
    }

    fn key(name: &str) -> ProbeKey {
        (USER.to_string(), "whistle".to_string(), name.to_string())
    }

    #[tokio::test]
    async fn snapshot_diffing_starts_stops_and_restarts() {
        let (mut manager, _events) = manager();

        let first = vec![logscan_entry("a", "/tmp/a.log"), logscan_entry("b", "/tmp/b.log")];
        let summary = manager.reconcile(&first);
        assert_eq!(summary.started, 2);
        assert_eq!(manager.running_count(), 2);

        // Same snapshot: nothing moves.
        let summary = manager.reconcile(&first);
        assert_eq!(summary.unchanged, 2);
        assert_eq!(summary.started + summary.stopped + summary.restarted, 0);

        // "b" drops out, "a" changes config, "c" appears.
        let second = vec![logscan_entry("a", "/tmp/a2.log"), logscan_entry("c", "/tmp/c.log")];
        let summary = manager.reconcile(&second);
        assert_eq!(summary.stopped, 1);
        assert_eq!(summary.restarted, 1);
        assert_eq!(summary.started, 1);
        assert_eq!(manager.state_of(&key("b")), None);
        assert_eq!(manager.state_of(&key("a")), Some(InstanceState::Running));
        assert_eq!(manager.state_of(&key("c")), Some(InstanceState::Running));

        manager.stop_all();
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn unknown_type_is_stopped_and_not_retried() {
        let (mut manager, _events) = manager();
        let entry = json!({
            "user": USER,
            "monitor": "whistle",
            "name": "weird",
            "type": "psychic",
            "machine": MACHINE,
        });

        let summary = manager.reconcile(std::slice::from_ref(&entry));
        assert_eq!(summary.failed, 1);
        assert_eq!(manager.state_of(&key("weird")), Some(InstanceState::Stopped));

        // Unchanged manifest: the dead instance is left alone.
        let summary = manager.reconcile(std::slice::from_ref(&entry));
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped() {
        let (mut manager, _events) = manager();
        let summary = manager.reconcile(&[json!({"type": "logscan"})]);
        assert_eq!(summary, ReconcileSummary::default());
    }
}
