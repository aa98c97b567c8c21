//! Prometheus metrics.
//!
//! Provides counters for:
//! - Records deleted per kind
//! - Failed mutation batches
//! - Records cloned
//! - Namespace outcomes per purge pass
//!
//! Every recording function is a no-op without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen_address)
        .install()?;

    tracing::info!(address = %config.listen_address, "Prometheus metrics listener started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record records deleted from a kind.
pub fn record_deletions(kind: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "nsdrain_records_deleted_total",
            "kind" => kind.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, count);
    }
}

/// Record a failed mutation batch.
///
/// # Arguments
/// * `operation` - "delete" or "put"
pub fn record_batch_failure(operation: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "nsdrain_batch_failures_total",
            "operation" => operation.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = operation;
    }
}

/// Record records written by the clone pipeline.
pub fn record_records_cloned(count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("nsdrain_records_cloned_total").increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = count;
    }
}

/// Record how a namespace was handled during a purge pass.
pub fn record_namespace_outcome(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "nsdrain_namespaces_total",
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Errors that can occur during metrics setup.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
