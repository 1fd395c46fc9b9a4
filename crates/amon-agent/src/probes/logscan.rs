//! The `logscan` runner: watch a file for appended lines matching a
//! pattern.
//!
//! Only content appended after the runner starts is scanned; a shrink
//! (rotation, truncation) resets the read offset to the top of the
//! file. An event fires when one scan period accumulates at least
//! `threshold` matching lines.

use std::io::SeekFrom;
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use amon_common::{Event, LogScanConfig, Probe};

pub async fn run(
    probe: Probe,
    config: LogScanConfig,
    events: mpsc::Sender<Event>,
    mut shutdown: oneshot::Receiver<()>,
) {
    // The pattern was validated when the probe was written; a compile
    // failure here means a damaged manifest.
    let regex = match Regex::new(&config.regex) {
        Ok(regex) => regex,
        Err(e) => {
            error!(probe = %probe.name, error = %e, "logscan pattern does not compile; runner stopped.");
            return;
        }
    };

    // Never alert on history: start at the current end of file.
    let mut offset = tokio::fs::metadata(&config.path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    let mut ticker = interval(Duration::from_secs(config.period));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(probe = %probe.name, path = %config.path, period = config.period, "logscan runner started.");

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!(probe = %probe.name, "logscan runner stopping.");
                break;
            }

            _ = ticker.tick() => {
                match scan_appended(&config.path, &regex, &mut offset).await {
                    Ok(matches) if matches >= config.threshold as usize => {
                        let data = json!({
                            "message": format!(
                                "Log \"{}\" matched /{}/ {matches} time(s).",
                                config.path, config.regex
                            ),
                            "matches": matches,
                        });
                        let event = Event::probe_fired(&probe, data, false);
                        if events.send(event).await.is_err() {
                            warn!(probe = %probe.name, "Event channel closed; logscan runner stopping.");
                            break;
                        }
                    }
                    Ok(matches) => {
                        debug!(probe = %probe.name, matches, "logscan below threshold.");
                    }
                    Err(e) => {
                        debug!(probe = %probe.name, error = %e, "logscan could not read file.");
                    }
                }
            }
        }
    }
}

/// Counts matching lines appended since the previous scan, advancing
/// `offset` to the new end of file.
pub async fn scan_appended(
    path: &str,
    regex: &Regex,
    offset: &mut u64,
) -> std::io::Result<usize> {
    let len = tokio::fs::metadata(path).await?.len();
    if len < *offset {
        // Truncated or rotated in place.
        *offset = 0;
    }
    if len == *offset {
        return Ok(0);
    }

    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(*offset)).await?;
    let mut appended = Vec::with_capacity((len - *offset) as usize);
    file.take(len - *offset).read_to_end(&mut appended).await?;
    *offset = len;

    let text = String::from_utf8_lossy(&appended);
    Ok(text.lines().filter(|line| regex.is_match(line)).count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use amon_common::ProbeTypeRegistry;
    use serde_json::Value;
    use std::io::Write;

    fn whistle_probe(path: &str, threshold: u32) -> Probe {
        Probe::from_public(
            "11111111-2222-3333-4444-555555555555",
            "whistle",
            "whistlelog",
            &json!({
                "type": "logscan",
                "machine": "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa",
                "config": {"path": path, "regex": "tweet", "threshold": threshold, "period": 1},
            }),
            &ProbeTypeRegistry::builtin(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn scan_counts_only_appended_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whistle.log");
        std::fs::write(&path, "tweet old\n").unwrap();
        let path = path.to_str().unwrap().to_string();
        let regex = Regex::new("tweet").unwrap();

        // Offset starts at the current end: the old line is not counted.
        let mut offset = std::fs::metadata(&path).unwrap().len();
        assert_eq!(scan_appended(&path, &regex, &mut offset).await.unwrap(), 0);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "tweet one").unwrap();
        writeln!(file, "quiet line").unwrap();
        writeln!(file, "tweet two").unwrap();
        assert_eq!(scan_appended(&path, &regex, &mut offset).await.unwrap(), 2);
        // Nothing new on the next pass.
        assert_eq!(scan_appended(&path, &regex, &mut offset).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn truncation_resets_the_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whistle.log");
        std::fs::write(&path, "tweet a\ntweet b\n").unwrap();
        let path = path.to_str().unwrap().to_string();
        let regex = Regex::new("tweet").unwrap();
        let mut offset = std::fs::metadata(&path).unwrap().len();

        std::fs::write(&path, "tweet fresh\n").unwrap();
        assert_eq!(scan_appended(&path, &regex, &mut offset).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn runner_fires_once_threshold_is_met() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whistle.log");
        std::fs::write(&path, "").unwrap();
        let path_str = path.to_str().unwrap().to_string();

        let probe = whistle_probe(&path_str, 2);
        let config = LogScanConfig::parse(probe.config.as_ref()).unwrap();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        let runner = tokio::spawn(run(probe, config, events_tx, shutdown_rx));

        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "tweet").unwrap();
            writeln!(file, "tweet").unwrap();
        }

        let event = events_rx.recv().await.unwrap();
        assert_eq!(event.v, 1);
        assert!(!event.clear);
        assert_eq!(event.probe.as_ref().unwrap().name, "whistlelog");
        assert_eq!(event.data["matches"], Value::from(2));
        runner.abort();
    }
}
