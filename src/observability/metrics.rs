//! # Metrics
//!
//! Prometheus metrics for a reconciliation run.
//!
//! The tool runs once and exits, so nothing is scraped; when
//! `METRICS_TEXTFILE` is set the registry is written in text exposition
//! format for node-exporter's textfile collector.
//!
//! ## Metrics Exposed
//!
//! - `grafana_token_manager_reconciliations_total{status}` - Runs by outcome
//! - `grafana_token_manager_reconciliation_errors_total` - Failed runs
//! - `grafana_token_manager_reconciliation_duration_seconds` - Run duration
//! - `grafana_token_manager_tokens_created_total` - Tokens created
//! - `grafana_token_manager_tokens_deleted_total{reason}` - Tokens deleted (expired, pruned)
//! - `grafana_token_manager_backend_operations_total{backend,operation}` - Backend calls
//! - `grafana_token_manager_backend_operation_duration_seconds{backend}` - Backend call duration
//! - `grafana_token_manager_backend_errors_total{backend}` - Failed backend calls

use anyhow::{Context, Result};
use prometheus::{Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::path::Path;
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "grafana_token_manager_reconciliations_total",
            "Total number of reconciliations by outcome status",
        ),
        &["status"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "grafana_token_manager_reconciliation_errors_total",
        "Total number of failed reconciliations",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "grafana_token_manager_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static TOKENS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "grafana_token_manager_tokens_created_total",
        "Total number of service account tokens created",
    )
    .expect("Failed to create TOKENS_CREATED_TOTAL metric - this should never happen")
});

static TOKENS_DELETED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "grafana_token_manager_tokens_deleted_total",
            "Total number of service account tokens deleted by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create TOKENS_DELETED_TOTAL metric - this should never happen")
});

static BACKEND_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "grafana_token_manager_backend_operations_total",
            "Total number of backend operations by backend and operation",
        ),
        &["backend", "operation"],
    )
    .expect("Failed to create BACKEND_OPERATIONS_TOTAL metric - this should never happen")
});

static BACKEND_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "grafana_token_manager_backend_operation_duration_seconds",
            "Duration of backend operations in seconds by backend",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["backend"],
    )
    .expect("Failed to create BACKEND_OPERATION_DURATION metric - this should never happen")
});

static BACKEND_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "grafana_token_manager_backend_errors_total",
            "Total number of failed backend operations by backend",
        ),
        &["backend"],
    )
    .expect("Failed to create BACKEND_ERRORS_TOTAL metric - this should never happen")
});

/// Register all metrics with the registry
///
/// # Errors
/// Returns an error if a metric is registered twice
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(TOKENS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOKENS_DELETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKEND_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKEND_OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(BACKEND_ERRORS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations(status: &str) {
    RECONCILIATIONS_TOTAL.with_label_values(&[status]).inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_tokens_created() {
    TOKENS_CREATED_TOTAL.inc();
}

/// `reason` is `expired` or `pruned`
pub fn increment_tokens_deleted(reason: &str) {
    TOKENS_DELETED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_backend_operation(backend: &str, operation: &str, duration: f64) {
    BACKEND_OPERATIONS_TOTAL
        .with_label_values(&[backend, operation])
        .inc();
    BACKEND_OPERATION_DURATION
        .with_label_values(&[backend])
        .observe(duration);
}

pub fn increment_backend_errors(backend: &str) {
    BACKEND_ERRORS_TOTAL.with_label_values(&[backend]).inc();
}

/// Render the registry in Prometheus text format
///
/// # Errors
/// Returns an error if encoding fails
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not valid UTF-8")
}

/// Write the registry to `path`, atomically via a sibling temp file
///
/// # Errors
/// Returns an error if rendering or any file operation fails
pub fn write_textfile(path: &Path) -> Result<()> {
    let rendered = render()?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, rendered)
        .with_context(|| format!("Failed to write metrics to {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move metrics into {}", path.display()))?;
    Ok(())
}
