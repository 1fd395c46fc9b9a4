//! The per-target manifest poll loop.
//!
//! Each tick asks the master for the target's current probe set and
//! rewrites the on-disk pair only when the content hash changed. Ticks
//! that overlap are skipped rather than piled up, and each tick is
//! jittered by up to 10% of the interval so a fleet of relays does not
//! poll in lockstep. Fetch failures keep the last-known manifest
//! serving.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::manifest::{content_md5, ManifestStore, TargetId};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("master request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("master returned {0}")]
    Status(reqwest::StatusCode),
    #[error("manifest write failed: {0}")]
    Write(#[from] std::io::Error),
}

/// One fetch-compare-write cycle. Returns true when the on-disk
/// manifest changed.
pub async fn sync_target_once(
    client: &reqwest::Client,
    master_url: &str,
    store: &ManifestStore,
    target: &TargetId,
) -> Result<bool, SyncError> {
    let url = format!(
        "{}/agentprobes?{}={}",
        master_url.trim_end_matches('/'),
        target.kind,
        target.uuid
    );
    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(SyncError::Status(response.status()));
    }
    let body = response.text().await?;

    let fresh = content_md5(body.as_bytes());
    if fresh == store.current_md5(target) {
        debug!(target = %target, "Manifest unchanged.");
        return Ok(false);
    }
    store.write(target, &body)?;
    info!(target = %target, md5 = %fresh, "Manifest updated from master.");
    Ok(true)
}

pub async fn run_poll_loop(
    client: reqwest::Client,
    master_url: String,
    store: Arc<ManifestStore>,
    target: TargetId,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let max_jitter = poll_interval.as_millis() as u64 / 10;
    info!(target = %target, interval_secs = poll_interval.as_secs(), "Manifest poll loop started.");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                info!(target = %target, "Manifest poll loop stopping.");
                break;
            }

            _ = ticker.tick() => {
                if max_jitter > 0 {
                    let jitter = rand::thread_rng().gen_range(0..=max_jitter);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                }
                if let Err(e) =
                    sync_target_once(&client, &master_url, &store, &target).await
                {
                    warn!(target = %target, error = %e, "Manifest sync failed; keeping last-known manifest.");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::Router;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MACHINE: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";

    #[derive(Deserialize)]
    struct ManifestQuery {
        machine: Option<String>,
    }

    /// Serves a manifest that flips after the first request.
    async fn fake_master(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/agentprobes",
            get(move |Query(query): Query<ManifestQuery>| {
                let hits = hits.clone();
                async move {
                    assert_eq!(query.machine.as_deref(), Some(MACHINE));
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        r#"[{"name":"whistlelog"}]"#
                    } else {
                        "[]"
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn sync_writes_only_on_change() {
        let hits = Arc::new(AtomicUsize::new(0));
        let master_url = fake_master(hits.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path()).unwrap();
        let target = TargetId::machine(MACHINE);
        let client = reqwest::Client::new();

        // First sync: non-empty manifest lands on disk.
        assert!(sync_target_once(&client, &master_url, &store, &target)
            .await
            .unwrap());
        let (body, md5) = store.read(&target);
        assert_eq!(body, r#"[{"name":"whistlelog"}]"#);
        assert_eq!(md5, content_md5(body.as_bytes()));

        // Second sync: master now serves the empty manifest.
        assert!(sync_target_once(&client, &master_url, &store, &target)
            .await
            .unwrap());
        assert_eq!(store.read(&target).0, "[]");

        // Third sync: unchanged, no rewrite.
        assert!(!sync_target_once(&client, &master_url, &store, &target)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unreachable_master_is_an_error_not_a_wipe() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path()).unwrap();
        let target = TargetId::machine(MACHINE);
        store.write(&target, r#"[{"name":"keep"}]"#).unwrap();

        let client = reqwest::Client::new();
        let err = sync_target_once(&client, "http://127.0.0.1:1", &store, &target).await;
        assert!(err.is_err());
        assert_eq!(store.read(&target).0, r#"[{"name":"keep"}]"#);
    }
}
