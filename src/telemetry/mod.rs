//! Telemetry aggregation
//!
//! Two cooperating loops hang off the `telemetry` stream. The merge loop
//! folds every published JSON object into a rolling snapshot and offers the
//! snapshot to a consumer with a non-blocking send. Consumers are either the
//! gauge exporter (always on) or the ground-station publisher (only when a
//! ground station is configured), which sends delta snapshots upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::gds;
use crate::hub::Manager;
use crate::metrics::Metrics;

/// Stream carrying raw telemetry objects
pub const TELEMETRY_STREAM: &str = "telemetry";

/// Rolling view of every telemetry key seen so far
pub type Snapshot = HashMap<String, Value>;

/// Injected into the upstream delta on a fixed cadence
const SSB_KEY: &str = "seconds_since_boot";
const SSB_INTERVAL: Duration = Duration::from_secs(10);

/// Minimum spacing between ground-station sends
const MIN_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Merge loop: fold the telemetry stream into a rolling snapshot
///
/// After each merge the snapshot is offered to `out` without blocking; a
/// busy consumer simply sees the next one.
pub async fn aggregate(
    manager: Arc<Manager>,
    out: mpsc::Sender<Snapshot>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut reader = manager.get_reader(TELEMETRY_STREAM);
    let mut all = Snapshot::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            item = reader.recv() => {
                let Some(data) = item else {
                    return Err(Error::StreamClosed);
                };

                let parsed: Snapshot = match serde_json::from_slice(&data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to parse telemetry data");
                        continue;
                    }
                };

                for (key, value) in parsed {
                    tracing::debug!(key = %key, value = %value, "telemetry data");
                    all.insert(key, value);
                }

                let _ = out.try_send(all.clone());
            }
        }
    }
}

/// Gauge loop: export string-valued telemetry keys as Prometheus gauges
pub async fn run_gauges(
    mut source: mpsc::Receiver<Snapshot>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            snapshot = source.recv() => {
                let Some(snapshot) = snapshot else {
                    return Err(Error::StreamClosed);
                };

                for (key, value) in &snapshot {
                    match value {
                        Value::String(raw) => metrics.set_telemetry_gauge(key, raw),
                        other => {
                            tracing::warn!(key = %key, value = %other, "telemetry value is not a string");
                        }
                    }
                }
            }
        }
    }
}

/// Publish loop: forward delta snapshots to the ground station
///
/// Scalar keys are compared against a last-sent cache and dropped when
/// unchanged; composite values are always forwarded. `seconds_since_boot`
/// is injected every ten seconds, and sends are spaced at least one second
/// apart. Upload failures are logged and the loop continues.
pub async fn publish(
    mut source: mpsc::Receiver<Snapshot>,
    client: gds::Client,
    boot: Instant,
    cancel: CancellationToken,
) -> Result<()> {
    let mut cache = Snapshot::new();
    let mut last_ssb: Option<Instant> = None;
    let mut last_send: Option<Instant> = None;

    let mut tick = tokio::time::interval(MIN_SEND_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let mut delta = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            snapshot = source.recv() => match snapshot {
                Some(snapshot) => snapshot,
                None => return Err(Error::StreamClosed),
            },
            _ = tick.tick() => Snapshot::new(),
        };

        drop_unchanged_scalars(&mut cache, &mut delta);

        if last_ssb.map_or(true, |t| t.elapsed() >= SSB_INTERVAL) {
            delta.insert(SSB_KEY.to_owned(), Value::from(boot.elapsed().as_secs()));
            last_ssb = Some(Instant::now());
        }

        if delta.is_empty() {
            continue;
        }

        if let Some(sent_at) = last_send {
            let since = sent_at.elapsed();
            if since < MIN_SEND_INTERVAL {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(MIN_SEND_INTERVAL - since) => {}
                }
            }
        }

        match client.send_telemetry(&delta).await {
            Ok(()) => {
                tracing::info!(keys = delta.len(), "uploaded telemetry to ground station");
                last_send = Some(Instant::now());
            }
            Err(e) => tracing::error!(error = %e, "failed to upload telemetry"),
        }
    }
}

/// Remove scalar keys whose value matches the last-sent cache
///
/// Changed and previously unseen scalars refresh the cache and stay in the
/// delta; composite values pass through untouched.
fn drop_unchanged_scalars(cache: &mut Snapshot, delta: &mut Snapshot) {
    delta.retain(|key, value| {
        if !is_scalar(value) {
            return true;
        }
        if cache.get(key) == Some(value) {
            return false;
        }
        cache.insert(key.clone(), value.clone());
        true
    });
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;

    fn snapshot(value: Value) -> Snapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn unchanged_scalars_are_dropped() {
        let mut cache = Snapshot::new();

        let mut first = snapshot(json!({"a": "1.5"}));
        drop_unchanged_scalars(&mut cache, &mut first);
        assert_eq!(first.len(), 1);

        for _ in 0..3 {
            let mut repeat = snapshot(json!({"a": "1.5"}));
            drop_unchanged_scalars(&mut cache, &mut repeat);
            assert!(repeat.is_empty());
        }

        let mut changed = snapshot(json!({"a": "2.5"}));
        drop_unchanged_scalars(&mut cache, &mut changed);
        assert_eq!(changed.get("a"), Some(&json!("2.5")));
    }

    #[test]
    fn composite_values_always_pass() {
        let mut cache = Snapshot::new();

        for _ in 0..2 {
            let mut delta = snapshot(json!({"pose": {"x": 1, "y": 2}}));
            drop_unchanged_scalars(&mut cache, &mut delta);
            assert!(delta.contains_key("pose"));
        }

        // Composites never enter the cache.
        assert!(cache.is_empty());
    }

    #[test]
    fn numeric_and_bool_scalars_are_cached() {
        let mut cache = Snapshot::new();

        let mut delta = snapshot(json!({"n": 4, "ok": true}));
        drop_unchanged_scalars(&mut cache, &mut delta);
        assert_eq!(delta.len(), 2);

        let mut repeat = snapshot(json!({"n": 4, "ok": true}));
        drop_unchanged_scalars(&mut cache, &mut repeat);
        assert!(repeat.is_empty());
    }

    #[tokio::test]
    async fn aggregate_merges_published_objects() {
        let manager = Arc::new(Manager::new());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = {
            let manager = Arc::clone(&manager);
            let cancel = cancel.clone();
            tokio::spawn(async move { aggregate(manager, tx, cancel).await })
        };

        let writer = manager.get_writer(TELEMETRY_STREAM);
        writer
            .send(Bytes::from_static(b"{\"a\":\"1\"}"))
            .await
            .unwrap();
        writer
            .send(Bytes::from_static(b"{\"b\":\"2\"}"))
            .await
            .unwrap();
        writer.release();

        let mut merged = Snapshot::new();
        while merged.len() < 2 {
            merged = rx.recv().await.expect("aggregate loop ended early");
        }
        assert_eq!(merged.get("a"), Some(&json!("1")));
        assert_eq!(merged.get("b"), Some(&json!("2")));

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn aggregate_skips_malformed_items() {
        let manager = Arc::new(Manager::new());
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = {
            let manager = Arc::clone(&manager);
            let cancel = cancel.clone();
            tokio::spawn(async move { aggregate(manager, tx, cancel).await })
        };

        let writer = manager.get_writer(TELEMETRY_STREAM);
        writer.send(Bytes::from_static(b"not json")).await.unwrap();
        writer
            .send(Bytes::from_static(b"{\"a\":\"1\"}"))
            .await
            .unwrap();
        writer.release();

        let merged = rx.recv().await.expect("aggregate loop ended early");
        assert_eq!(merged.get("a"), Some(&json!("1")));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn gauges_follow_string_telemetry() {
        let metrics = Arc::new(Metrics::new(Instant::now()).unwrap());
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = {
            let metrics = Arc::clone(&metrics);
            let cancel = cancel.clone();
            tokio::spawn(async move { run_gauges(rx, metrics, cancel).await })
        };

        tx.send(snapshot(json!({"speed": "1.5", "count": 3})))
            .await
            .unwrap();
        drop(tx);

        // Channel closed counts as the source going away.
        assert!(matches!(task.await.unwrap(), Err(Error::StreamClosed)));

        assert!(metrics.has_telemetry_gauge("speed"));
        assert!(!metrics.has_telemetry_gauge("count"));
        cancel.cancel();
    }
}
