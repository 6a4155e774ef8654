//! Prometheus metrics for observability.
//!
//! The Store records counters and histograms through the `metrics` facade.
//! Nothing is collected until a recorder is installed; binaries install the
//! Prometheus recorder once at startup and render the snapshot on demand.
//!
//! # Example
//!
//! ```rust,no_run
//! use nursery_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//! // ... run the application ...
//! println!("{}", recorder.render());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

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

/// Installed Prometheus recorder.
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    /// Install the Prometheus recorder as the global `metrics` recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a recorder is already installed.
    pub fn install() -> Result<Self, MetricsError> {
        register_metrics();

        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        tracing::info!("Prometheus metrics recorder installed");
        Ok(Self { handle })
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Register metric descriptions for the Store and the booking domain.
fn register_metrics() {
    describe_counter!("store.commands.total", "Actions sent to a store");
    describe_counter!(
        "store.effects.executed",
        "Effects executed by a store, labelled by effect type"
    );
    describe_counter!(
        "store.shutdown.rejected_actions",
        "Actions rejected because the store was shutting down"
    );
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time spent inside the reducer while holding the state lock"
    );

    describe_counter!("nursery.bookings.created", "Bookings created");
    describe_counter!("nursery.bookings.approved", "Bookings approved with stock reserved");
    describe_counter!("nursery.bookings.rejected", "Bookings rejected by an administrator");
    describe_counter!("nursery.stock.insufficient", "Approvals refused for lack of stock");
    describe_counter!(
        "nursery.payments.signature_mismatch",
        "Payment callbacks whose signature did not verify"
    );
    describe_counter!(
        "nursery.reservations.expired",
        "Approved reservations released after their window elapsed"
    );
}
