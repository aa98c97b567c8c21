//! Namespace storage report built from `__Stat_Ns_Total__` statistics.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;

use crate::store::{Datastore, Query, StoreError, integer_value};

/// Per-namespace statistics kind.
pub const NAMESPACE_STATS_KIND: &str = "__Stat_Ns_Total__";

/// Properties summed into the storage size of a namespace.
pub const STORAGE_PROPERTIES: [&str; 3] = [
    "entity_bytes",
    "builtin_index_bytes",
    "composite_index_bytes",
];

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to query statistics: {0}")]
    Store(#[from] StoreError),

    #[error("No statistics found")]
    NoStatistics,

    #[error("Statistics have no storage fields")]
    MissingFields,
}

/// Storage totals across a set of namespaces.
#[derive(Debug, Default)]
pub struct StorageReport {
    /// Namespace and its size in bytes, in completion order.
    pub namespaces: Vec<(String, u64)>,
    /// Namespaces whose statistics could not be read.
    pub failures: Vec<(String, String)>,
}

impl StorageReport {
    pub fn total_bytes(&self) -> u64 {
        self.namespaces.iter().map(|(_, bytes)| bytes).sum()
    }

    pub fn total_gib(&self) -> f64 {
        bytes_to_gib(self.total_bytes())
    }
}

pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GIB
}

/// Storage size of one namespace in bytes, entity data plus indexes.
pub async fn namespace_storage_bytes(
    store: &dyn Datastore,
    namespace: &str,
) -> Result<u64, StorageError> {
    let batch = store
        .run_query(&Query::new(NAMESPACE_STATS_KIND, namespace).limit(1))
        .await?;
    let stats = batch.entities.first().ok_or(StorageError::NoStatistics)?;

    let total: i64 = STORAGE_PROPERTIES
        .iter()
        .filter_map(|name| stats.properties.get(*name).and_then(integer_value))
        .sum();

    if total <= 0 {
        return Err(StorageError::MissingFields);
    }
    Ok(total as u64)
}

/// Compute storage for every namespace with at most `concurrency` lookups in flight.
pub async fn storage_report(
    store: Arc<dyn Datastore>,
    namespaces: Vec<String>,
    concurrency: usize,
) -> StorageReport {
    let mut results = futures::stream::iter(namespaces)
        .map(|namespace| {
            let store = store.clone();
            async move {
                let result = namespace_storage_bytes(store.as_ref(), &namespace).await;
                (namespace, result)
            }
        })
        .buffer_unordered(concurrency.max(1));

    let mut report = StorageReport::default();
    while let Some((namespace, result)) = results.next().await {
        match result {
            Ok(bytes) => {
                tracing::info!(
                    namespace = %namespace,
                    gib = %format!("{:.2}", bytes_to_gib(bytes)),
                    "Namespace storage"
                );
                report.namespaces.push((namespace, bytes));
            }
            Err(e) => {
                tracing::warn!(namespace = %namespace, error = %e, "Failed to compute namespace storage");
                report.failures.push((namespace, e.to_string()));
            }
        }
    }

    tracing::info!(
        namespaces = report.namespaces.len(),
        failures = report.failures.len(),
        total_gib = %format!("{:.2}", report.total_gib()),
        "Storage report complete"
    );
    report
}
