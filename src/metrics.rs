//! Optional Prometheus metrics for download runs
//!
//! Recording is always cheap: without an installed exporter the `metrics`
//! macros are no-ops. [`init_metrics`] installs the exporter and its scrape
//! endpoint.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are no-ops.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "download_attempts_total",
        Unit::Count,
        "Download attempts started, per dataset"
    );
    describe_counter!(
        "downloads_verified_total",
        Unit::Count,
        "Downloads confirmed on disk"
    );
    describe_counter!(
        "downloads_failed_total",
        Unit::Count,
        "Datasets still missing after exhausting a pass's attempts"
    );
    describe_counter!(
        "trigger_failures_total",
        Unit::Count,
        "Export workflow attempts that did not reach the download click"
    );
    describe_histogram!(
        "verify_duration_seconds",
        Unit::Seconds,
        "Time from trigger end to verified artifact or timeout"
    );
    describe_histogram!(
        "artifact_size_bytes",
        Unit::Bytes,
        "Size of verified artifacts"
    );
    describe_gauge!(
        "datasets_missing",
        Unit::Count,
        "Datasets still missing at the end of the latest pass"
    );
    describe_counter!(
        "runs_total",
        Unit::Count,
        "Completed runs by final status"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Timing and outcome of one download attempt
pub struct AttemptMetrics {
    dataset: String,
    pass: u32,
    attempt: u32,
    start_time: Instant,
}

impl AttemptMetrics {
    /// Start tracking an attempt
    pub fn start(dataset: impl Into<String>, pass: u32, attempt: u32) -> Self {
        let dataset = dataset.into();
        counter!("download_attempts_total", "dataset" => dataset.clone()).increment(1);
        Self {
            dataset,
            pass,
            attempt,
            start_time: Instant::now(),
        }
    }

    /// Record that the export workflow failed before the download click.
    ///
    /// `kind` is a fixed label such as [`TriggerFailure::kind`] returns.
    ///
    /// [`TriggerFailure::kind`]: crate::trigger::TriggerFailure::kind
    pub fn record_trigger_failure(&self, kind: &'static str) {
        counter!(
            "trigger_failures_total",
            "dataset" => self.dataset.clone(),
            "reason" => kind,
        )
        .increment(1);
    }

    /// Record a verified artifact
    pub fn record_verified(&self, size_bytes: u64) {
        let duration = self.start_time.elapsed();
        counter!("downloads_verified_total", "dataset" => self.dataset.clone()).increment(1);
        histogram!("verify_duration_seconds", "dataset" => self.dataset.clone())
            .record(duration.as_secs_f64());
        histogram!("artifact_size_bytes", "dataset" => self.dataset.clone())
            .record(size_bytes as f64);

        debug!(
            dataset = %self.dataset,
            pass = self.pass,
            attempt = self.attempt,
            duration_secs = duration.as_secs(),
            "Attempt metrics recorded"
        );
    }

    /// Record an attempt that ended without an artifact
    pub fn record_not_verified(&self) {
        histogram!("verify_duration_seconds", "dataset" => self.dataset.clone())
            .record(self.start_time.elapsed().as_secs_f64());
    }
}

/// Record a dataset that exhausted its attempts in a pass
pub fn record_dataset_failed(dataset: &str, pass: u32) {
    counter!(
        "downloads_failed_total",
        "dataset" => dataset.to_string(),
        "pass" => pass.to_string(),
    )
    .increment(1);
}

/// Record the missing count after a pass
pub fn record_pass(pass: u32, missing: usize) {
    gauge!("datasets_missing").set(missing as f64);
    debug!(pass, missing, "Pass metrics recorded");
}

/// Record the final status of a run
pub fn record_run(status: &str) {
    counter!("runs_total", "status" => status.to_string()).increment(1);
}
