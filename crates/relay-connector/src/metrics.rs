//! Connection metrics and health.
//!
//! [`ConnectionMetrics`] holds the per-connector counters reported in status.
//! Every update is mirrored to the global `metrics` facade under the names
//! below, labelled with the connector ID, so a process-wide exporter sees
//! the same numbers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

// Metric name constants.

/// Frames handed to the transport (counter, labels: connector).
pub const RELAY_TRANSMISSIONS_TOTAL: &str = "relay_transmissions_total";
/// Failed sends and connects (counter, labels: connector, code).
pub const RELAY_ERRORS_TOTAL: &str = "relay_errors_total";
/// Inbound frames (counter, labels: connector).
pub const RELAY_FRAMES_RECEIVED_TOTAL: &str = "relay_frames_received_total";
/// Reconnect attempts scheduled (counter, labels: connector).
pub const RELAY_RECONNECT_ATTEMPTS_TOTAL: &str = "relay_reconnect_attempts_total";
/// Open links (gauge, labels: connector). 1 = connected, 0 = not.
pub const RELAY_CONNECTIONS_ACTIVE: &str = "relay_connections_active";

/// Error rate below which the connector is optimal.
const OPTIMAL_ERROR_RATE: f64 = 0.05;
/// Error rate below which the connector is degraded rather than critical.
const DEGRADED_ERROR_RATE: f64 = 0.20;

/// Health derived from the error rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Error rate under 5%.
    Optimal,
    /// Error rate under 20%.
    Degraded,
    /// Error rate of 20% or more.
    Critical,
}

impl Health {
    /// Classify an error rate in `[0, 1]`.
    pub fn from_error_rate(rate: f64) -> Self {
        if rate < OPTIMAL_ERROR_RATE {
            Self::Optimal
        } else if rate < DEGRADED_ERROR_RATE {
            Self::Degraded
        } else {
            Self::Critical
        }
    }
}

/// Point-in-time copy of [`ConnectionMetrics`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Frames handed to the transport.
    pub transmission_count: u64,
    /// Inbound frames.
    pub received_count: u64,
    /// Failed operations.
    pub error_count: u64,
    /// `errors / (transmissions + errors)`.
    pub error_rate: f64,
    /// Mean send latency.
    pub average_latency_ms: f64,
    /// Time of the last successful transmission.
    pub last_transmission: Option<DateTime<Utc>>,
}

/// Counters owned by one connector.
#[derive(Debug)]
pub struct ConnectionMetrics {
    connector: String,
    transmission_count: u64,
    received_count: u64,
    error_count: u64,
    total_latency: Duration,
    last_transmission: Option<DateTime<Utc>>,
}

impl ConnectionMetrics {
    /// Zeroed counters for `connector`.
    pub fn new(connector: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
            transmission_count: 0,
            received_count: 0,
            error_count: 0,
            total_latency: Duration::ZERO,
            last_transmission: None,
        }
    }

    /// A frame reached the transport after `latency`.
    pub fn record_transmission(&mut self, latency: Duration) {
        self.transmission_count += 1;
        self.total_latency += latency;
        self.last_transmission = Some(Utc::now());
        metrics::counter!(RELAY_TRANSMISSIONS_TOTAL, "connector" => self.connector.clone())
            .increment(1);
    }

    /// An inbound frame arrived.
    pub fn record_received(&mut self) {
        self.received_count += 1;
        metrics::counter!(RELAY_FRAMES_RECEIVED_TOTAL, "connector" => self.connector.clone())
            .increment(1);
    }

    /// An operation failed with the given error code.
    pub fn record_error(&mut self, code: &'static str) {
        self.error_count += 1;
        metrics::counter!(RELAY_ERRORS_TOTAL, "connector" => self.connector.clone(), "code" => code)
            .increment(1);
    }

    /// A reconnect attempt was scheduled.
    pub fn record_reconnect_attempt(&self) {
        metrics::counter!(RELAY_RECONNECT_ATTEMPTS_TOTAL, "connector" => self.connector.clone())
            .increment(1);
    }

    /// The link opened or closed.
    pub fn set_connected(&self, connected: bool) {
        metrics::gauge!(RELAY_CONNECTIONS_ACTIVE, "connector" => self.connector.clone())
            .set(if connected { 1.0 } else { 0.0 });
    }

    /// Transmissions so far.
    pub fn transmission_count(&self) -> u64 {
        self.transmission_count
    }

    /// Errors so far.
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Errors over all attempted operations; 0 before any activity.
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        let attempts = self.transmission_count + self.error_count;
        if attempts == 0 {
            return 0.0;
        }
        self.error_count as f64 / attempts as f64
    }

    /// Mean latency of successful transmissions in milliseconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn average_latency_ms(&self) -> f64 {
        if self.transmission_count == 0 {
            return 0.0;
        }
        self.total_latency.as_secs_f64() * 1000.0 / self.transmission_count as f64
    }

    /// Current health.
    pub fn health(&self) -> Health {
        Health::from_error_rate(self.error_rate())
    }

    /// Copy the counters for reporting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transmission_count: self.transmission_count,
            received_count: self.received_count,
            error_count: self.error_count,
            error_rate: self.error_rate(),
            average_latency_ms: self.average_latency_ms(),
            last_transmission: self.last_transmission,
        }
    }
}
