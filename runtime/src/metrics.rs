//! Prometheus metrics for the checkout and admin services.
//!
//! Metrics are emitted through the `metrics` facade and are no-ops until a
//! recorder is installed. [`MetricsServer`] installs the Prometheus exporter
//! and serves `/metrics` over HTTP.
//!
//! # Example
//!
//! ```rust,no_run
//! use cafe_orders_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use cafe_orders_core::order::OrderStatus;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and spawn the HTTP exporter on the current
    /// Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or its listener cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and leaves the existing recorder in place.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(error = ?e, "Metrics exporter stopped");
            }
        });
        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "cafe_checkout_total",
        "Checkout attempts by outcome (placed, insufficient_stock, timeout, ...)"
    );
    describe_histogram!(
        "cafe_checkout_duration_seconds",
        "Time from checkout request to outcome"
    );
    describe_counter!(
        "cafe_stock_rejections_total",
        "Checkouts rejected because live stock did not cover the cart"
    );
    describe_counter!(
        "cafe_order_transitions_total",
        "Order status transitions applied by administrators"
    );
}

/// Checkout metrics recorder.
pub struct CheckoutMetrics;

impl CheckoutMetrics {
    /// Record a checkout outcome.
    pub fn record_outcome(outcome: &'static str, duration: Duration) {
        counter!("cafe_checkout_total", "outcome" => outcome).increment(1);
        histogram!("cafe_checkout_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a stock rejection, at revalidation or at commit.
    pub fn record_stock_rejection() {
        counter!("cafe_stock_rejections_total").increment(1);
    }
}

/// Order lifecycle metrics recorder.
pub struct OrderMetrics;

impl OrderMetrics {
    /// Record a status transition.
    pub fn record_transition(status: OrderStatus) {
        counter!("cafe_order_transitions_total", "status" => status.as_str()).increment(1);
    }
}
