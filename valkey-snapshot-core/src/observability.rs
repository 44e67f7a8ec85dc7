/*!
Logging and metrics for snapshot rounds.

Logging goes through `tracing` with an `EnvFilter` subscriber, optionally as
JSON lines. With the `metrics` feature, capture and upload activity is also
counted in a Prometheus registry that the HTTP surface exposes as text.

The `record_*` functions are always available and do nothing when the
feature is disabled, so callers never need their own `cfg` guards.
*/

#[cfg(feature = "metrics")]
use once_cell::sync::OnceCell;
#[cfg(feature = "metrics")]
use prometheus::{Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use std::time::Duration;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, SnapshotError};

#[cfg(feature = "metrics")]
static METRICS: OnceCell<CaptureMetrics> = OnceCell::new();

/// Prometheus metrics for capture rounds
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct CaptureMetrics {
    pub rounds_total: Counter,
    pub rounds_skipped_total: Counter,
    pub captures_total: CounterVec,
    pub keys_skipped_total: Counter,
    pub capture_duration_seconds: Histogram,
    pub artifact_size_bytes: Histogram,
    pub upload_retries_total: Counter,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> SnapshotError {
    SnapshotError::storage(format!("Failed to create {name} metric: {e}"))
}

#[cfg(feature = "metrics")]
impl CaptureMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let rounds_total = Counter::new(
            "valkey_snapshot_rounds_total",
            "Snapshot rounds started by the scheduler",
        )
        .map_err(|e| metric_error("rounds_total", e))?;

        let rounds_skipped_total = Counter::new(
            "valkey_snapshot_endpoint_skips_total",
            "Endpoint captures skipped because the previous one was still running",
        )
        .map_err(|e| metric_error("endpoint_skips_total", e))?;

        let captures_total = CounterVec::new(
            Opts::new(
                "valkey_snapshot_captures_total",
                "Endpoint captures by outcome",
            ),
            &["outcome"],
        )
        .map_err(|e| metric_error("captures_total", e))?;

        let keys_skipped_total = Counter::new(
            "valkey_snapshot_keys_skipped_total",
            "Keys left out of logical snapshots because they vanished or failed to read",
        )
        .map_err(|e| metric_error("keys_skipped_total", e))?;

        let capture_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "valkey_snapshot_capture_duration_seconds",
            "Duration of one endpoint capture including upload",
        ))
        .map_err(|e| metric_error("capture_duration_seconds", e))?;

        let artifact_size_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "valkey_snapshot_artifact_size_bytes",
                "Size of uploaded artifacts in bytes",
            )
            .buckets(prometheus::exponential_buckets(1024.0, 4.0, 10).map_err(|e| {
                metric_error("artifact_size_bytes", e)
            })?),
        )
        .map_err(|e| metric_error("artifact_size_bytes", e))?;

        let upload_retries_total = Counter::new(
            "valkey_snapshot_upload_retries_total",
            "Upload attempts repeated after a transient failure",
        )
        .map_err(|e| metric_error("upload_retries_total", e))?;

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(rounds_total.clone()),
            Box::new(rounds_skipped_total.clone()),
            Box::new(captures_total.clone()),
            Box::new(keys_skipped_total.clone()),
            Box::new(capture_duration_seconds.clone()),
            Box::new(artifact_size_bytes.clone()),
            Box::new(upload_retries_total.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .map_err(|e| SnapshotError::storage(format!("Failed to register metric: {e}")))?;
        }

        Ok(Self {
            rounds_total,
            rounds_skipped_total,
            captures_total,
            keys_skipped_total,
            capture_duration_seconds,
            artifact_size_bytes,
            upload_retries_total,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> Result<&'static CaptureMetrics> {
        METRICS.get_or_try_init(Self::new)
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| SnapshotError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| SnapshotError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

#[cfg(feature = "metrics")]
fn with_metrics<F: FnOnce(&CaptureMetrics)>(f: F) {
    match CaptureMetrics::global() {
        Ok(metrics) => f(metrics),
        Err(e) => tracing::warn!(error = %e, "Metrics unavailable"),
    }
}

/// A scheduler tick started a round
pub fn record_round_started() {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.rounds_total.inc());
}

/// An endpoint was left out of a round by the overlap policy
pub fn record_endpoint_skipped() {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.rounds_skipped_total.inc());
}

/// One endpoint capture finished, successfully or not
pub fn record_capture(success: bool, duration: Duration) {
    #[cfg(feature = "metrics")]
    with_metrics(|m| {
        let outcome = if success { "success" } else { "failure" };
        m.captures_total.with_label_values(&[outcome]).inc();
        m.capture_duration_seconds.observe(duration.as_secs_f64());
    });
    #[cfg(not(feature = "metrics"))]
    let _ = (success, duration);
}

pub fn record_keys_skipped(count: usize) {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.keys_skipped_total.inc_by(count as f64));
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

pub fn record_artifact_size(size_bytes: usize) {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.artifact_size_bytes.observe(size_bytes as f64));
    #[cfg(not(feature = "metrics"))]
    let _ = size_bytes;
}

pub fn record_upload_retries(retries: usize) {
    #[cfg(feature = "metrics")]
    with_metrics(|m| m.upload_retries_total.inc_by(retries as f64));
    #[cfg(not(feature = "metrics"))]
    let _ = retries;
}

/// Metrics in Prometheus text format, or `None` without the `metrics` feature
pub fn gather_metrics() -> Option<Result<String>> {
    #[cfg(feature = "metrics")]
    {
        Some(CaptureMetrics::global().and_then(|m| m.gather_metrics()))
    }
    #[cfg(not(feature = "metrics"))]
    {
        None
    }
}

/// Default filter directive when `RUST_LOG` is unset
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Install the global tracing subscriber
///
/// # Arguments
/// * `verbose` - Default to `debug` instead of `info` when `RUST_LOG` is unset
/// * `json` - Emit JSON lines instead of human readable output
pub fn init_observability(verbose: bool, json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    CaptureMetrics::global()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))
        .map_err(|e| SnapshotError::config(format!("Invalid log filter: {e}")))?;

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(true);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        SnapshotError::config(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!(verbose, json, "Logging initialized");
    Ok(())
}
