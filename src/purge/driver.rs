//! Checkpoint-driven purge loop.
//!
//! Each pass walks the checkpoint file in order. Safe namespaces and namespaces
//! without kinds are removed from the file; the rest are drained kind by kind.
//! Passes repeat until the checkpoint is empty or the pass limit is reached.

use std::sync::Arc;

use thiserror::Error;

use super::{
    checkpoint::{CheckpointError, CheckpointFile, SafeList},
    pool::{NamespaceReport, drain_namespace},
    worker::DrainSettings,
};
use crate::{config::PurgeConfig, inventory::list_kinds, observability::metrics, store::Datastore};

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// What happened to one namespace during a pass.
#[derive(Debug, Clone)]
pub enum NamespaceOutcome {
    /// Listed in the safe list; removed from the checkpoint without a query.
    SafeSkipped,
    /// No kinds left; removed from the checkpoint.
    EmptyRemoved,
    /// Kinds were drained.
    Processed(NamespaceReport),
    /// Kinds could not be listed; the namespace stays in the checkpoint.
    Failed(String),
}

impl NamespaceOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            NamespaceOutcome::SafeSkipped => "safe_skipped",
            NamespaceOutcome::EmptyRemoved => "empty_removed",
            NamespaceOutcome::Processed(_) => "processed",
            NamespaceOutcome::Failed(_) => "failed",
        }
    }
}

/// Results of one pass over the checkpoint.
#[derive(Debug, Default)]
pub struct PassSummary {
    pub pass: u32,
    pub namespaces: Vec<(String, NamespaceOutcome)>,
    /// Namespaces left in the checkpoint after the pass.
    pub remaining: usize,
}

impl PassSummary {
    pub fn total_deleted(&self) -> u64 {
        self.namespaces
            .iter()
            .map(|(_, outcome)| match outcome {
                NamespaceOutcome::Processed(report) => report.total(),
                _ => 0,
            })
            .sum()
    }

    fn count(&self, label: &str) -> usize {
        self.namespaces
            .iter()
            .filter(|(_, outcome)| outcome.label() == label)
            .count()
    }
}

/// How a purge run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverExit {
    /// The checkpoint is empty.
    Completed { passes: u32 },
    /// The pass limit was reached with namespaces still pending.
    PassesExhausted { passes: u32, remaining: usize },
}

pub struct PurgeDriver {
    store: Arc<dyn Datastore>,
    config: PurgeConfig,
    settings: DrainSettings,
    checkpoint: CheckpointFile,
}

impl PurgeDriver {
    pub fn new(store: Arc<dyn Datastore>, config: PurgeConfig) -> Self {
        let settings = DrainSettings::from_config(&config);
        let checkpoint = CheckpointFile::new(config.checkpoint_path.clone());
        Self {
            store,
            config,
            settings,
            checkpoint,
        }
    }

    /// Pass limit in effect. A dry run never empties the checkpoint, so an
    /// unbounded dry run is capped at one pass.
    fn max_passes(&self) -> u32 {
        if self.settings.dry_run && self.config.max_passes == 0 {
            1
        } else {
            self.config.max_passes
        }
    }

    /// Run passes until the checkpoint is empty or the pass limit is reached.
    pub async fn run(&self) -> Result<DriverExit, PurgeError> {
        let dry_run_msg = if self.settings.dry_run {
            " (DRY RUN)"
        } else {
            ""
        };

        let pending = self.checkpoint.load().await?;
        if pending.is_empty() {
            tracing::info!(
                path = %self.checkpoint.path().display(),
                "Checkpoint is empty, nothing to purge"
            );
            return Ok(DriverExit::Completed { passes: 0 });
        }

        let max_passes = self.max_passes();
        tracing::info!(
            namespaces = pending.len(),
            max_concurrent_kinds = self.config.max_concurrent_kinds,
            page_size = self.settings.page_size,
            max_passes = max_passes,
            remove_on_success = self.config.remove_on_success,
            dry_run = self.settings.dry_run,
            "Starting purge{}",
            dry_run_msg
        );

        let mut passes = 0;
        loop {
            passes += 1;
            let summary = self.run_pass(passes).await?;

            tracing::info!(
                pass = passes,
                deleted = summary.total_deleted(),
                processed = summary.count("processed"),
                safe_skipped = summary.count("safe_skipped"),
                empty_removed = summary.count("empty_removed"),
                failed = summary.count("failed"),
                remaining = summary.remaining,
                "Purge pass complete{}",
                dry_run_msg
            );

            if summary.remaining == 0 {
                return Ok(DriverExit::Completed { passes });
            }
            if max_passes > 0 && passes >= max_passes {
                return Ok(DriverExit::PassesExhausted {
                    passes,
                    remaining: summary.remaining,
                });
            }

            tokio::time::sleep(self.config.restart_delay()).await;
        }
    }

    /// One pass over the checkpoint. Both files are re-read first.
    pub async fn run_pass(&self, pass: u32) -> Result<PassSummary, PurgeError> {
        let pending = self.checkpoint.load().await?;
        let safe = SafeList::load(&self.config.safe_list_path).await?;

        tracing::debug!(
            pass = pass,
            pending = pending.len(),
            safe = safe.len(),
            "Starting purge pass"
        );

        let mut summary = PassSummary {
            pass,
            ..Default::default()
        };
        for namespace in pending {
            let outcome = self.process_namespace(&namespace, &safe).await?;
            metrics::record_namespace_outcome(outcome.label());
            summary.namespaces.push((namespace, outcome));
        }

        summary.remaining = self.checkpoint.load().await?.len();
        Ok(summary)
    }

    async fn process_namespace(
        &self,
        namespace: &str,
        safe: &SafeList,
    ) -> Result<NamespaceOutcome, PurgeError> {
        if safe.contains(namespace) {
            tracing::info!(namespace = %namespace, "Namespace is safe, removing from checkpoint");
            self.checkpoint.remove(namespace).await?;
            return Ok(NamespaceOutcome::SafeSkipped);
        }

        let kinds = match list_kinds(&self.store, namespace).await {
            Ok(kinds) => kinds,
            Err(e) => {
                tracing::error!(namespace = %namespace, error = %e, "Failed to list kinds");
                return Ok(NamespaceOutcome::Failed(e.to_string()));
            }
        };

        if kinds.is_empty() {
            tracing::info!(namespace = %namespace, "Namespace is empty, removing from checkpoint");
            self.checkpoint.remove(namespace).await?;
            return Ok(NamespaceOutcome::EmptyRemoved);
        }

        tracing::info!(namespace = %namespace, kinds = kinds.len(), "Purging namespace");
        let report = drain_namespace(
            self.store.clone(),
            namespace,
            kinds,
            &self.settings,
            self.config.max_concurrent_kinds,
        )
        .await;

        if self.config.remove_on_success && !self.settings.dry_run && report.is_clean() {
            self.checkpoint.remove(namespace).await?;
        }

        Ok(NamespaceOutcome::Processed(report))
    }
}
