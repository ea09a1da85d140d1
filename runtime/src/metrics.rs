//! Prometheus metrics for the booking engine.
//!
//! Metric names are registered with descriptions once at startup
//! ([`register_business_metrics`]); recording goes through the small recorder
//! structs below so call sites stay one line long. When no recorder is
//! installed (tests), recording is a no-op.
//!
//! # Example
//!
//! ```rust,no_run
//! use fieldbook_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create a server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: false,
        }
    }

    /// Register metric descriptions and start the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        if self.started {
            return Ok(());
        }

        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_business_metrics();
        self.started = true;
        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }

    /// Whether the exporter is installed
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }
}

/// Register descriptions for every Fieldbook metric.
pub fn register_business_metrics() {
    describe_counter!(
        "fieldbook_reservations_total",
        "Reservation attempts by outcome (created, conflict, rejected, failed)"
    );
    describe_counter!(
        "fieldbook_payment_orders_total",
        "Payment order transitions by resulting status"
    );
    describe_counter!(
        "fieldbook_slot_conflicts_total",
        "Reservations refused because the slot was taken"
    );
    describe_counter!(
        "fieldbook_gateway_calls_total",
        "Payment gateway calls by outcome (ok, error, timeout)"
    );
    describe_counter!(
        "fieldbook_notifications_failed_total",
        "Notifications that could not be delivered"
    );
    describe_counter!(
        "fieldbook_store_commits_total",
        "Store changesets by outcome (committed, slot_taken, stale_write, duplicate, error)"
    );
    describe_histogram!(
        "fieldbook_slot_lock_wait_seconds",
        "Time spent waiting for a schedule lock"
    );
}

/// Recorder for booking-engine metrics.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a reservation attempt.
    pub fn record_reservation(outcome: &'static str) {
        counter!("fieldbook_reservations_total", "outcome" => outcome).increment(1);
    }

    /// Record a slot conflict.
    pub fn record_conflict() {
        counter!("fieldbook_slot_conflicts_total").increment(1);
    }

    /// Record a payment order reaching `status`.
    pub fn record_order(status: &'static str) {
        counter!("fieldbook_payment_orders_total", "status" => status).increment(1);
    }

    /// Record a gateway call.
    pub fn record_gateway_call(outcome: &'static str) {
        counter!("fieldbook_gateway_calls_total", "outcome" => outcome).increment(1);
    }

    /// Record a failed notification.
    pub fn record_notification_failure(kind: &'static str) {
        counter!("fieldbook_notifications_failed_total", "kind" => kind).increment(1);
    }

    /// Record time spent waiting for a schedule lock.
    pub fn record_lock_wait(waited: Duration) {
        histogram!("fieldbook_slot_lock_wait_seconds").record(waited.as_secs_f64());
    }
}
