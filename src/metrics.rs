//! Prometheus metrics for the service
//!
//! One `Metrics` object owns the registry and every instrument; it is
//! created at startup and passed explicitly to the components that record
//! into it. Telemetry gauges are created lazily, one per telemetry key whose
//! value parses as a number.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use prometheus::{Encoder, Gauge, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::Result;

/// Prefix for dynamically created telemetry gauges
const TELEMETRY_PREFIX: &str = "telemetry_";

/// Process-wide metrics registry
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    uptime_seconds: Gauge,
    telemetry_gauges: Mutex<HashMap<String, Gauge>>,
    boot: Instant,
}

impl Metrics {
    pub fn new(boot: Instant) -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "yakapi_requests_total",
                "A counter for requests to the server.",
            ),
            &["code", "method"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let uptime_seconds = Gauge::new(
            "yakapi_uptime_seconds",
            "The uptime of the yakapi service",
        )?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            uptime_seconds,
            telemetry_gauges: Mutex::new(HashMap::new()),
            boot,
        })
    }

    /// Record one served request
    pub fn observe_request(&self, code: u16, method: &str) {
        self.requests_total
            .with_label_values(&[&code.to_string(), method])
            .inc();
    }

    /// Create or update the gauge for a telemetry key
    ///
    /// The gauge is registered on first sight of a parseable value; values
    /// that do not parse as a float update nothing.
    pub fn set_telemetry_gauge(&self, key: &str, raw: &str) {
        let Ok(value) = raw.parse::<f64>() else {
            tracing::debug!(key, value = raw, "telemetry value is not numeric");
            return;
        };

        let mut gauges = self.telemetry_gauges.lock();
        let gauge = match gauges.get(key) {
            Some(gauge) => gauge.clone(),
            None => {
                tracing::info!(name = key, "establishing new telemetry metric");
                let gauge = match Gauge::new(
                    format!("{TELEMETRY_PREFIX}{key}"),
                    "Telemetry value reported by the rover.",
                ) {
                    Ok(gauge) => gauge,
                    Err(e) => {
                        tracing::warn!(error = %e, key, "invalid telemetry metric name");
                        return;
                    }
                };
                if let Err(e) = self.registry.register(Box::new(gauge.clone())) {
                    tracing::warn!(error = %e, key, "failed to register telemetry metric");
                    return;
                }
                gauges.insert(key.to_owned(), gauge.clone());
                gauge
            }
        };

        tracing::debug!(key, value, "setting telemetry metric");
        gauge.set(value);
    }

    /// Whether a telemetry gauge exists for `key`
    pub fn has_telemetry_gauge(&self, key: &str) -> bool {
        self.telemetry_gauges.lock().contains_key(key)
    }

    /// Render the text exposition format for the `/metrics` endpoint
    pub fn encode(&self) -> Result<String> {
        self.uptime_seconds.set(self.boot.elapsed().as_secs_f64());

        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> Metrics {
        Metrics::new(Instant::now()).unwrap()
    }

    #[test]
    fn numeric_string_creates_gauge() {
        let metrics = metrics();
        metrics.set_telemetry_gauge("speed", "1.5");

        assert!(metrics.has_telemetry_gauge("speed"));
        let text = metrics.encode().unwrap();
        assert!(text.contains("telemetry_speed 1.5"));
    }

    #[test]
    fn non_numeric_string_creates_nothing() {
        let metrics = metrics();
        metrics.set_telemetry_gauge("status", "nominal");

        assert!(!metrics.has_telemetry_gauge("status"));
        assert!(!metrics.encode().unwrap().contains("telemetry_status"));
    }

    #[test]
    fn gauge_is_updated_in_place() {
        let metrics = metrics();
        metrics.set_telemetry_gauge("speed", "1.5");
        metrics.set_telemetry_gauge("speed", "2.5");

        let text = metrics.encode().unwrap();
        assert!(text.contains("telemetry_speed 2.5"));
        assert!(!text.contains("telemetry_speed 1.5"));
    }

    #[test]
    fn request_counter_tracks_code_and_method() {
        let metrics = metrics();
        metrics.observe_request(200, "GET");
        metrics.observe_request(200, "GET");
        metrics.observe_request(404, "POST");

        let text = metrics.encode().unwrap();
        assert!(text.contains("yakapi_requests_total{code=\"200\",method=\"GET\"} 2"));
        assert!(text.contains("yakapi_requests_total{code=\"404\",method=\"POST\"} 1"));
    }

    #[test]
    fn exposition_includes_uptime() {
        let metrics = metrics();
        assert!(metrics.encode().unwrap().contains("yakapi_uptime_seconds"));
    }
}
