//! Copy every kind of one namespace into another, possibly in another store.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;

use crate::{
    config::CloneConfig,
    inventory::{KindInfo, list_kinds},
    observability::metrics,
    pipeline::{PageScanner, ScanOptions, WriteMutator},
    store::{Datastore, Entity, StoreError},
};

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("Failed to list kinds of {namespace}: {source}")]
    ListKinds {
        namespace: String,
        #[source]
        source: StoreError,
    },

    #[error("Scan of {kind} aborted after {copied} records: {source}")]
    Scan {
        kind: String,
        copied: u64,
        #[source]
        source: StoreError,
    },

    #[error("Write to {kind} failed after {copied} records: {source}")]
    Write {
        kind: String,
        copied: u64,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone)]
pub struct CloneSettings {
    pub page_size: usize,
    pub page_retries: u32,
    pub retry_backoff: std::time::Duration,
    /// Entities per `put_multi` call.
    pub batch_size: usize,
}

impl CloneSettings {
    pub fn from_config(config: &CloneConfig) -> Self {
        Self {
            page_size: config.pagination.page_size,
            page_retries: config.pagination.page_retries,
            retry_backoff: config.pagination.retry_backoff(),
            batch_size: config.batch_size,
        }
    }
}

impl Default for CloneSettings {
    fn default() -> Self {
        Self::from_config(&CloneConfig::default())
    }
}

/// Outcome of cloning a namespace.
#[derive(Debug, Default)]
pub struct CloneReport {
    /// Kinds copied in full, with their record counts.
    pub copied: Vec<(String, u64)>,
    /// Kinds that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

impl CloneReport {
    pub fn total(&self) -> u64 {
        self.copied.iter().map(|(_, count)| count).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Re-key `entity` into `namespace`, keeping ids, names and ancestors.
pub fn rekey(entity: Entity, namespace: &str) -> Entity {
    Entity {
        key: entity.key.in_namespace(namespace),
        properties: entity.properties,
    }
}

/// Copy one kind. Returns the number of records written.
///
/// The scan runs in key order. Ordering by a property would skip every
/// record that does not carry it.
pub async fn clone_kind(
    source: Arc<dyn Datastore>,
    destination: Arc<dyn Datastore>,
    source_namespace: &str,
    dest_namespace: &str,
    kind: &str,
    settings: &CloneSettings,
) -> Result<u64, CloneError> {
    let info = KindInfo::new(kind);
    let options = ScanOptions::entities(settings.page_size)
        .with_retries(settings.page_retries, settings.retry_backoff);
    let mut pages = std::pin::pin!(
        PageScanner::new(source, source_namespace, &info, options).into_stream()
    );
    let mut writer = WriteMutator::new(destination, settings.batch_size);

    let write_error = |writer: &WriteMutator, source| CloneError::Write {
        kind: kind.to_string(),
        copied: writer.written(),
        source,
    };

    while let Some(page) = pages.next().await {
        let page = page.map_err(|source| CloneError::Scan {
            kind: kind.to_string(),
            copied: writer.written(),
            source,
        })?;
        for entity in page {
            let pushed = writer.push(rekey(entity, dest_namespace)).await;
            if let Err(e) = pushed {
                return Err(write_error(&writer, e));
            }
        }
    }

    let flushed = writer.flush().await;
    if let Err(e) = flushed {
        return Err(write_error(&writer, e));
    }

    metrics::record_records_cloned(writer.written());
    Ok(writer.written())
}

/// Copy every non-reserved kind of `source_namespace` into `dest_namespace`.
///
/// A failing kind is logged and recorded; the remaining kinds are still copied.
pub async fn clone_namespace(
    source: Arc<dyn Datastore>,
    destination: Arc<dyn Datastore>,
    source_namespace: &str,
    dest_namespace: &str,
    settings: &CloneSettings,
) -> Result<CloneReport, CloneError> {
    let kinds = list_kinds(&source, source_namespace)
        .await
        .map_err(|source| CloneError::ListKinds {
            namespace: source_namespace.to_string(),
            source,
        })?;

    tracing::info!(
        source_namespace = %source_namespace,
        dest_namespace = %dest_namespace,
        kinds = kinds.len(),
        "Cloning namespace"
    );

    let mut report = CloneReport::default();
    for kind in kinds {
        match clone_kind(
            source.clone(),
            destination.clone(),
            source_namespace,
            dest_namespace,
            &kind,
            settings,
        )
        .await
        {
            Ok(count) => {
                tracing::info!(kind = %kind, records = count, "Kind cloned");
                report.copied.push((kind, count));
            }
            Err(e) => {
                tracing::error!(kind = %kind, error = %e, "Failed to clone kind");
                report.failed.push((kind, e.to_string()));
            }
        }
    }

    tracing::info!(
        source_namespace = %source_namespace,
        dest_namespace = %dest_namespace,
        records = report.total(),
        failed_kinds = report.failed.len(),
        "Namespace clone complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::{Key, MemoryStore};

    fn settings() -> CloneSettings {
        CloneSettings {
            page_size: 10,
            page_retries: 0,
            retry_backoff: std::time::Duration::ZERO,
            batch_size: 4,
        }
    }

    #[test]
    fn test_rekey_keeps_identity_and_ancestors() {
        let parent = Key::name("Account", "prod", "acme");
        let entity = Entity::new(Key::id("Invoice", "prod", 42).with_parent(parent))
            .with_property("total", json!({"integerValue": "7"}));

        let copy = rekey(entity, "dev");
        assert_eq!(copy.key, Key::id("Invoice", "dev", 42).with_parent(Key::name("Account", "dev", "acme")));
        assert_eq!(copy.properties["total"], json!({"integerValue": "7"}));
    }

    #[tokio::test]
    async fn test_clone_copies_all_kinds() {
        let source = Arc::new(MemoryStore::new());
        let destination = Arc::new(MemoryStore::new());
        source
            .insert((1..=23).map(|id| {
                Entity::new(Key::id("Order", "prod", id)).with_property("created_at", json!(id))
            }))
            .await;
        source
            .insert(vec![Entity::new(Key::name("Config", "prod", "main"))])
            .await;

        let report = clone_namespace(source.clone(), destination.clone(), "prod", "dev", &settings())
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.total(), 24);
        assert_eq!(destination.count("dev", "Order").await, 23);
        assert_eq!(destination.count("dev", "Config").await, 1);
        assert_eq!(source.count("prod", "Order").await, 23);
        // 23 orders in batches of 4 plus one config batch.
        assert_eq!(destination.stats().put_calls, 7);
    }

    #[tokio::test]
    async fn test_write_failure_fails_kind_only() {
        let source = Arc::new(MemoryStore::new());
        let destination = Arc::new(MemoryStore::new());
        destination.fail_puts();
        source
            .insert(vec![Entity::new(Key::id("Order", "prod", 1))])
            .await;

        let report = clone_namespace(source, destination, "prod", "dev", &settings())
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Order");
    }

    #[tokio::test]
    async fn test_scan_abort_is_an_error() {
        let source = Arc::new(MemoryStore::new());
        let destination = Arc::new(MemoryStore::new());
        source
            .insert((1..=15).map(|id| Entity::new(Key::id("Order", "prod", id))))
            .await;
        // First page succeeds, the second page fails.
        source.fail_queries_after("Order", 1, 1);

        let err = clone_kind(source, destination, "prod", "dev", "Order", &settings())
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::Scan { copied: 8, .. }));
    }

    #[tokio::test]
    async fn test_clone_copies_records_with_differing_properties() {
        let source = Arc::new(MemoryStore::new());
        let destination = Arc::new(MemoryStore::new());
        source
            .insert(vec![
                Entity::new(Key::id("Order", "prod", 1)).with_property("created_at", json!(1)),
                Entity::new(Key::id("Order", "prod", 2)).with_property("total", json!(9)),
                Entity::new(Key::id("Order", "prod", 3)),
            ])
            .await;

        let report = clone_namespace(source, destination.clone(), "prod", "dev", &settings())
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.copied, vec![("Order".to_string(), 3)]);
        assert_eq!(destination.count("dev", "Order").await, 3);
        let copy = destination
            .lookup(&Key::id("Order", "dev", 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(copy.properties["total"], json!(9));
    }

    #[tokio::test]
    async fn test_listing_failure_is_returned() {
        let source = Arc::new(MemoryStore::new());
        source.fail_queries(crate::store::KIND_METADATA, 1);

        let err = clone_namespace(source, Arc::new(MemoryStore::new()), "prod", "dev", &settings())
            .await
            .unwrap_err();
        assert!(matches!(err, CloneError::ListKinds { .. }));
    }
}
