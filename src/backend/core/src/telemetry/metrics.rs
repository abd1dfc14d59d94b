//! Prometheus metrics for admission control and the retry queue.
//!
//! ```rust,ignore
//! let registry = init_metrics(&MetricsConfig::default(), "sma-core")?;
//! let controller = AdmissionController::with_metrics(
//!     config.admission.clone(),
//!     Arc::new(PrometheusAdmissionMetrics),
//! )?;
//! // later, from a /metrics handler
//! let body = registry.render();
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::admission::{AdmissionMetrics, ExecutionSample, Priority, RejectionReason};
use crate::retry::{JobKind, JobStatus};

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: BTreeMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: BTreeMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ]
}

/// Handle to the installed recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Registry that renders nothing.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Install the Prometheus recorder and register metric descriptions.
///
/// # Errors
///
/// Returns an error if the buckets are invalid or a recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let mut builder = PrometheusBuilder::new().add_global_label("service", service_name);

    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }

    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;

    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    // Admission
    describe_histogram!(
        "sma_admission_execution_seconds",
        "Execution time of admitted operations in seconds"
    );
    describe_histogram!(
        "sma_admission_queue_wait_seconds",
        "Time admitted operations spent queued in seconds"
    );
    describe_counter!(
        "sma_admission_operations_total",
        "Admitted operations by outcome"
    );
    describe_counter!(
        "sma_admission_rejections_total",
        "Submissions turned away without running"
    );
    describe_gauge!("sma_admission_queue_depth", "Operations waiting for a slot");
    describe_gauge!("sma_admission_active", "Operations currently executing");

    // Retry queue
    describe_counter!("sma_retry_jobs_enqueued_total", "Jobs added to the retry queue");
    describe_counter!("sma_retry_attempts_total", "Retry attempts by outcome");
    describe_counter!(
        "sma_retry_jobs_exhausted_total",
        "Jobs that ran out of attempts"
    );
    describe_counter!(
        "sma_retry_jobs_cleaned_up_total",
        "Exhausted jobs removed after the retention window"
    );
    describe_histogram!("sma_retry_sweep_seconds", "Duration of one sweep in seconds");
    describe_gauge!("sma_retry_jobs", "Jobs in the retry table by status");

    // Errors
    describe_counter!("sma_errors_total", "Errors constructed, by code and category");
}

/// Admission metrics sink backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusAdmissionMetrics;

impl AdmissionMetrics for PrometheusAdmissionMetrics {
    fn record_execution(&self, sample: &ExecutionSample) {
        histogram!(
            "sma_admission_execution_seconds",
            "controller" => sample.controller.clone(),
            "priority" => sample.priority.as_str(),
            "outcome" => sample.outcome.as_str(),
        )
        .record(sample.duration.as_secs_f64());

        histogram!(
            "sma_admission_queue_wait_seconds",
            "controller" => sample.controller.clone(),
            "priority" => sample.priority.as_str(),
        )
        .record(sample.queue_wait.as_secs_f64());

        counter!(
            "sma_admission_operations_total",
            "controller" => sample.controller.clone(),
            "outcome" => sample.outcome.as_str(),
        )
        .increment(1);

        gauge!(
            "sma_admission_queue_depth",
            "controller" => sample.controller.clone(),
        )
        .set(sample.queue_length as f64);
    }

    fn record_queue_depth(&self, controller: &str, depth: usize, active: usize) {
        gauge!("sma_admission_queue_depth", "controller" => controller.to_string())
            .set(depth as f64);
        gauge!("sma_admission_active", "controller" => controller.to_string())
            .set(active as f64);
    }

    fn record_rejection(&self, controller: &str, priority: Priority, reason: RejectionReason) {
        counter!(
            "sma_admission_rejections_total",
            "controller" => controller.to_string(),
            "priority" => priority.as_str(),
            "reason" => reason.as_str(),
        )
        .increment(1);
    }
}

/// Retry queue metrics.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a job entering the queue.
    pub fn record_enqueued(kind: JobKind) {
        counter!("sma_retry_jobs_enqueued_total", "kind" => kind.as_str()).increment(1);
    }

    /// Record one attempt and how it ended (`succeeded`, `rescheduled`, `exhausted`).
    pub fn record_attempt(kind: JobKind, outcome: &'static str) {
        counter!(
            "sma_retry_attempts_total",
            "kind" => kind.as_str(),
            "outcome" => outcome,
        )
        .increment(1);

        if outcome == "exhausted" {
            counter!("sma_retry_jobs_exhausted_total", "kind" => kind.as_str()).increment(1);
        }
    }

    /// Record exhausted jobs deleted by cleanup.
    pub fn record_cleaned_up(count: usize) {
        if count > 0 {
            counter!("sma_retry_jobs_cleaned_up_total").increment(count as u64);
        }
    }

    /// Record the duration of a sweep.
    pub fn record_sweep(duration_seconds: f64) {
        histogram!("sma_retry_sweep_seconds").record(duration_seconds);
    }

    /// Set the job table gauge for one status.
    pub fn set_jobs(status: JobStatus, count: usize) {
        gauge!("sma_retry_jobs", "status" => status.as_str()).set(count as f64);
    }
}
