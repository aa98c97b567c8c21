//! Per-kind drain worker.

use std::{sync::Arc, time::Duration};

use crate::{
    config::PurgeConfig,
    inventory::KindInfo,
    observability::metrics,
    pipeline::{DeleteMutator, PageScanner, ScanOptions, probe_ordering},
    store::Datastore,
};

/// Settings shared by every kind worker of a pass.
#[derive(Debug, Clone)]
pub struct DrainSettings {
    /// Keys per page, and per delete batch.
    pub page_size: usize,
    pub page_retries: u32,
    pub retry_backoff: Duration,
    /// Records between two progress log lines.
    pub progress_interval: u64,
    pub dry_run: bool,
}

impl DrainSettings {
    pub fn from_config(config: &PurgeConfig) -> Self {
        Self {
            page_size: config.pagination.page_size,
            page_retries: config.pagination.page_retries,
            retry_backoff: config.pagination.retry_backoff(),
            progress_interval: config.progress_interval,
            dry_run: config.safety.dry_run,
        }
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions::keys(self.page_size).with_retries(self.page_retries, self.retry_backoff)
    }
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self::from_config(&PurgeConfig::default())
    }
}

/// How a kind worker finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindOutcome {
    /// Scanned until the kind ran out of pages.
    Drained,
    /// A page still failed after its retries; the rest of the kind was left.
    ScanAborted(String),
    /// The ordering probe failed; nothing was scanned.
    ProbeFailed(String),
    /// The worker task panicked.
    Panicked,
}

impl KindOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, KindOutcome::Drained)
    }
}

/// Result of draining one kind.
#[derive(Debug, Clone)]
pub struct KindReport {
    pub kind: String,
    /// Records deleted (or counted, in dry-run mode).
    pub deleted: u64,
    /// Records in batches whose delete call failed.
    pub failed_records: u64,
    pub failed_batches: u64,
    pub pages: u64,
    pub outcome: KindOutcome,
}

impl KindReport {
    fn empty(kind: impl Into<String>, outcome: KindOutcome) -> Self {
        Self {
            kind: kind.into(),
            deleted: 0,
            failed_records: 0,
            failed_batches: 0,
            pages: 0,
            outcome,
        }
    }

    /// Report for a worker that never returned.
    pub fn panicked(kind: impl Into<String>) -> Self {
        Self::empty(kind, KindOutcome::Panicked)
    }
}

/// Emits a progress line every time `interval` more records are counted.
#[derive(Debug)]
pub struct ProgressTracker {
    interval: u64,
    total: u64,
    last_reported: u64,
}

impl ProgressTracker {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            total: 0,
            last_reported: 0,
        }
    }

    /// Add `count` records. Returns the new total when a report is due.
    pub fn record(&mut self, count: u64) -> Option<u64> {
        self.total += count;
        if self.total - self.last_reported >= self.interval {
            self.last_reported = self.total;
            Some(self.total)
        } else {
            None
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Delete every record of `kind` in `namespace`.
///
/// Never fails: probe errors, page aborts and failed delete batches are all
/// recorded in the returned report.
pub async fn drain_kind(
    store: Arc<dyn Datastore>,
    namespace: String,
    kind: String,
    settings: DrainSettings,
) -> KindReport {
    let order = match probe_ordering(store.as_ref(), &namespace, &kind).await {
        Ok(order) => order,
        Err(e) => {
            tracing::error!(
                namespace = %namespace,
                kind = %kind,
                error = %e,
                "Failed to probe ordering, skipping kind"
            );
            return KindReport::empty(kind, KindOutcome::ProbeFailed(e.to_string()));
        }
    };

    tracing::debug!(namespace = %namespace, kind = %kind, order = ?order, "Draining kind");

    let info = KindInfo::new(kind.clone()).with_order(order);
    let mut scanner = PageScanner::new(store.clone(), namespace.clone(), &info, settings.scan_options());
    let mut mutator = DeleteMutator::new(store, settings.page_size, settings.dry_run);
    let mut progress = ProgressTracker::new(settings.progress_interval);

    while let Some(page) = scanner.next_page().await {
        let keys: Vec<_> = page.into_iter().map(|entity| entity.key).collect();
        let applied = mutator.apply(&keys).await;
        if applied > 0 && !settings.dry_run {
            metrics::record_deletions(&kind, applied);
        }
        if let Some(total) = progress.record(applied) {
            tracing::info!(
                namespace = %namespace,
                kind = %kind,
                deleted = total,
                dry_run = settings.dry_run,
                "Drain progress"
            );
        }
    }

    let summary = scanner.into_summary();
    let outcome = match summary.error {
        Some(e) => KindOutcome::ScanAborted(e.to_string()),
        None => KindOutcome::Drained,
    };

    let report = KindReport {
        kind,
        deleted: mutator.deleted(),
        failed_records: mutator.failed_records(),
        failed_batches: mutator.failed_batches(),
        pages: summary.pages,
        outcome,
    };

    tracing::info!(
        namespace = %namespace,
        kind = %report.kind,
        deleted = report.deleted,
        failed_records = report.failed_records,
        pages = report.pages,
        outcome = ?report.outcome,
        "Kind drained"
    );
    report
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::{Entity, Key, MemoryStore};

    fn settings(page_size: usize) -> DrainSettings {
        DrainSettings {
            page_size,
            page_retries: 0,
            retry_backoff: Duration::ZERO,
            progress_interval: 10,
            dry_run: false,
        }
    }

    async fn seeded(kind: &str, count: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert((1..=count).map(|id| {
                Entity::new(Key::id(kind, "ns", id)).with_property("created_at", json!(id))
            }))
            .await;
        store
    }

    #[test]
    fn test_progress_reports_each_interval() {
        let mut progress = ProgressTracker::new(10);
        assert_eq!(progress.record(4), None);
        assert_eq!(progress.record(6), Some(10));
        assert_eq!(progress.record(9), None);
        assert_eq!(progress.record(25), Some(44));
        assert_eq!(progress.record(0), None);
        assert_eq!(progress.total(), 44);
    }

    #[tokio::test]
    async fn test_drain_deletes_everything() {
        let store = seeded("Order", 35).await;

        let report = drain_kind(store.clone(), "ns".into(), "Order".into(), settings(10)).await;
        assert_eq!(report.deleted, 35);
        assert_eq!(report.pages, 4);
        assert_eq!(report.outcome, KindOutcome::Drained);
        assert_eq!(store.count("ns", "Order").await, 0);
    }

    #[tokio::test]
    async fn test_empty_kind_issues_no_mutations() {
        let store = Arc::new(MemoryStore::new());

        let report = drain_kind(store.clone(), "ns".into(), "Order".into(), settings(10)).await;
        assert_eq!(report.deleted, 0);
        assert_eq!(report.pages, 0);
        assert!(report.outcome.is_success());
        assert_eq!(store.stats().delete_calls, 0);
    }

    #[tokio::test]
    async fn test_probe_failure_skips_kind() {
        let store = seeded("Order", 5).await;
        store.fail_queries("Order", 1);

        let report = drain_kind(store.clone(), "ns".into(), "Order".into(), settings(10)).await;
        assert!(matches!(report.outcome, KindOutcome::ProbeFailed(_)));
        assert_eq!(report.deleted, 0);
        assert_eq!(store.count("ns", "Order").await, 5);
    }

    #[tokio::test]
    async fn test_failed_batches_are_reported_not_counted() {
        let store = seeded("Order", 15).await;
        store.fail_deletes("Order");

        let report = drain_kind(store.clone(), "ns".into(), "Order".into(), settings(10)).await;
        assert_eq!(report.deleted, 0);
        assert_eq!(report.failed_batches, 2);
        assert_eq!(report.failed_records, 15);
        assert_eq!(report.outcome, KindOutcome::Drained);
    }

    #[tokio::test]
    async fn test_scan_abort_keeps_partial_count() {
        let store = seeded("Order", 25).await;
        // Probe and first page succeed, the second page fails.
        store.fail_queries_after("Order", 2, 1);

        let report = drain_kind(store.clone(), "ns".into(), "Order".into(), settings(10)).await;
        assert!(matches!(report.outcome, KindOutcome::ScanAborted(_)));
        assert_eq!(report.deleted, 10);
        assert_eq!(report.pages, 1);
        assert_eq!(store.count("ns", "Order").await, 15);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_records() {
        let store = seeded("Order", 12).await;
        let mut dry = settings(10);
        dry.dry_run = true;

        let report = drain_kind(store.clone(), "ns".into(), "Order".into(), dry).await;
        assert_eq!(report.deleted, 12);
        assert_eq!(store.count("ns", "Order").await, 12);
    }
}
