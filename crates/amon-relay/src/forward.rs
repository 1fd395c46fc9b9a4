//! Best-effort event forwarding to the master.
//!
//! Events from agents enter a bounded queue; one forwarder task drains
//! it, POSTing each event with exponential backoff. Delivery gives up
//! after a bounded number of attempts (a few minutes of backoff), and
//! every loss is counted and logged. There is no persistent buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use amon_common::Event;

pub const QUEUE_CAPACITY: usize = 512;
const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY_SECS: u64 = 1;
const MAX_DELAY_SECS: u64 = 120;

#[derive(Clone)]
pub struct EventForwarder {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventForwarder {
    /// Starts the forwarder task and returns the enqueue handle.
    pub fn start(client: reqwest::Client, master_url: String) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let dropped = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(forward_loop(client, master_url, rx, dropped.clone()));
        (Self { tx, dropped }, task)
    }

    /// Non-blocking; a full queue drops the event (counted).
    pub fn enqueue(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "Event queue full; dropping event.");
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let secs = BASE_DELAY_SECS
        .saturating_mul(1u64 << attempt.min(16))
        .min(MAX_DELAY_SECS);
    Duration::from_secs(secs)
}

async fn forward_loop(
    client: reqwest::Client,
    master_url: String,
    mut rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
) {
    let url = format!("{}/events", master_url.trim_end_matches('/'));
    while let Some(event) = rx.recv().await {
        let mut delivered = false;
        for attempt in 0..MAX_ATTEMPTS {
            match client.post(&url).json(&event).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(event_uuid = %event.uuid, attempt, "Event forwarded.");
                    delivered = true;
                    break;
                }
                Ok(response) if response.status().is_client_error() => {
                    // The master rejected the event outright; retrying
                    // cannot help.
                    error!(
                        event_uuid = %event.uuid,
                        status = %response.status(),
                        "Master rejected event; dropping."
                    );
                    break;
                }
                Ok(response) => {
                    warn!(
                        event_uuid = %event.uuid,
                        status = %response.status(),
                        attempt,
                        "Master unavailable for event forward."
                    );
                }
                Err(err) => {
                    warn!(event_uuid = %event.uuid, error = %err, attempt, "Event forward failed.");
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
        if !delivered {
            dropped.fetch_add(1, Ordering::Relaxed);
            error!(event_uuid = %event.uuid, "Event dropped after retry budget.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), Duration::from_secs(120));
        assert_eq!(backoff_delay(60), Duration::from_secs(120));
    }

    async fn fake_master(fail_first: usize, hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/events",
            post(move |Json(_event): Json<Event>| {
                let hits = hits.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < fail_first {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::ACCEPTED
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

    #[tokio::test(start_paused = true)]
    async fn retries_through_transient_failures() {
        let hits = Arc::new(AtomicUsize::new(0));
        let master_url = fake_master(2, hits.clone()).await;
        let (forwarder, task) = EventForwarder::start(reqwest::Client::new(), master_url);

        let event = Event::fake("11111111-2222-3333-4444-555555555555", "whistle", false);
        assert!(forwarder.enqueue(event));

        // Paused time auto-advances through the backoff sleeps.
        while hits.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(forwarder.dropped(), 0);
        task.abort();
    }
}
