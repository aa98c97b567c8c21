//! Bounded fan-out of kind workers within one namespace.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::worker::{DrainSettings, KindOutcome, KindReport, drain_kind};
use crate::{inventory::is_reserved_kind, store::Datastore};

/// Per-kind results for one namespace.
#[derive(Debug, Clone)]
pub struct NamespaceReport {
    pub namespace: String,
    pub kinds: Vec<KindReport>,
}

impl NamespaceReport {
    /// Records deleted across all kinds.
    pub fn total(&self) -> u64 {
        self.kinds.iter().map(|k| k.deleted).sum()
    }

    pub fn failed_records(&self) -> u64 {
        self.kinds.iter().map(|k| k.failed_records).sum()
    }

    /// Whether every kind drained cleanly.
    pub fn is_clean(&self) -> bool {
        self.kinds
            .iter()
            .all(|k| k.outcome.is_success() && k.failed_batches == 0)
    }
}

/// Drain `kinds` of `namespace` with at most `max_concurrent` workers running.
///
/// A permit is taken before each task is spawned and released when the task
/// ends, however it ends. Reports are folded only after every task has been
/// joined.
pub async fn drain_namespace(
    store: Arc<dyn Datastore>,
    namespace: &str,
    kinds: Vec<String>,
    settings: &DrainSettings,
    max_concurrent: usize,
) -> NamespaceReport {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut handles = Vec::with_capacity(kinds.len());

    for kind in kinds.into_iter().filter(|kind| !is_reserved_kind(kind)) {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::error!(namespace = %namespace, kind = %kind, error = %e, "Worker pool closed");
                break;
            }
        };

        let store = store.clone();
        let namespace = namespace.to_string();
        let settings = settings.clone();
        let task_kind = kind.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            drain_kind(store, namespace, task_kind, settings).await
        });
        handles.push((kind, handle));
    }

    let joined = futures::future::join_all(
        handles
            .into_iter()
            .map(|(kind, handle)| async move { (kind, handle.await) }),
    )
    .await;

    let kinds = joined
        .into_iter()
        .map(|(kind, result)| match result {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(namespace = %namespace, kind = %kind, error = %e, "Kind worker panicked");
                KindReport::panicked(kind)
            }
        })
        .collect::<Vec<_>>();

    let report = NamespaceReport {
        namespace: namespace.to_string(),
        kinds,
    };

    let per_kind: Vec<String> = report
        .kinds
        .iter()
        .map(|k| match &k.outcome {
            KindOutcome::Drained => format!("{}={}", k.kind, k.deleted),
            other => format!("{}={} ({:?})", k.kind, k.deleted, other),
        })
        .collect();
    tracing::info!(
        namespace = %namespace,
        total = report.total(),
        failed_records = report.failed_records(),
        kinds = %per_kind.join(", "),
        "Namespace drained"
    );

    report
}
