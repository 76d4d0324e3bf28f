use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
};
use std::sync::{Arc, RwLock};

/// Metrics for the retry sender
pub struct RetryMetrics {
    pub send_duration: HistogramVec,
    pub send_attempts: HistogramVec,
    pub recoveries: IntCounterVec,
}

impl RetryMetrics {
    /// Create new retry metrics with the provided registry
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let send_duration = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "tx_retry_send_duration_seconds",
                "Time from send start to success or terminal failure"
            )
            .buckets(vec![
                0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0
            ]),
            &["chain_id", "outcome"],
            registry
        )?;

        let send_attempts = register_histogram_vec_with_registry!(
            HistogramOpts::new(
                "tx_retry_send_attempts",
                "Broadcasts made for a single send, fillers included"
            )
            .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0, 10.0]),
            &["chain_id"],
            registry
        )?;

        let recoveries = register_int_counter_vec_with_registry!(
            Opts::new(
                "tx_retry_recoveries_total",
                "Failed attempts by classified category"
            ),
            &["chain_id", "category"],
            registry
        )?;

        Ok(RetryMetrics {
            send_duration,
            send_attempts,
            recoveries,
        })
    }
}

lazy_static! {
    /// Default metrics registry (fallback if no external registry provided)
    static ref DEFAULT_RETRY_METRICS_REGISTRY: Registry = Registry::new();

    static ref DEFAULT_RETRY_METRICS: Option<Arc<RetryMetrics>> =
        match RetryMetrics::new(&DEFAULT_RETRY_METRICS_REGISTRY) {
            Ok(metrics) => Some(Arc::new(metrics)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to register default retry metrics");
                None
            }
        };

    /// Global metrics instance - can be set by the binary crate or uses default
    static ref RETRY_METRICS_INSTANCE: RwLock<Option<Arc<RetryMetrics>>> = RwLock::new(None);
}

/// Initialize retry metrics with a custom registry.
/// Call once at application startup, before any send.
pub fn initialize_metrics(metrics: RetryMetrics) {
    let mut instance = RETRY_METRICS_INSTANCE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *instance = Some(Arc::new(metrics));
}

fn get_metrics() -> Option<Arc<RetryMetrics>> {
    let custom = RETRY_METRICS_INSTANCE
        .read()
        .ok()
        .and_then(|instance| instance.clone());

    custom.or_else(|| DEFAULT_RETRY_METRICS.clone())
}

/// Export metrics in Prometheus format from the default registry.
/// For custom registries, the binary crate should handle metrics export directly
pub fn export_default_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = DEFAULT_RETRY_METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_send_outcome(chain_id: u64, outcome: &str, duration_seconds: f64) {
    if let Some(metrics) = get_metrics() {
        let chain_id = chain_id.to_string();
        metrics
            .send_duration
            .with_label_values(&[chain_id.as_str(), outcome])
            .observe(duration_seconds);
    }
}

pub fn record_send_attempts(chain_id: u64, attempts: u32) {
    if let Some(metrics) = get_metrics() {
        metrics
            .send_attempts
            .with_label_values(&[chain_id.to_string().as_str()])
            .observe(attempts as f64);
    }
}

pub fn record_recovery(chain_id: u64, category: &str) {
    if let Some(metrics) = get_metrics() {
        let chain_id = chain_id.to_string();
        metrics
            .recoveries
            .with_label_values(&[chain_id.as_str(), category])
            .inc();
    }
}
