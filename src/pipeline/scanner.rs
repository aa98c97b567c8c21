//! Cursor-continued scan over one kind.

use std::{sync::Arc, time::Duration};

use futures::Stream;

use crate::{
    inventory::KindInfo,
    store::{Cursor, Datastore, Entity, Query, QueryBatch, StoreError, StoreResult},
};

/// How a scan fetches its pages.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Maximum entries per page. A shorter page ends the scan.
    pub page_size: usize,
    /// Fetch keys only (delete path) instead of full entities (clone path).
    pub keys_only: bool,
    /// Extra attempts for a failed page before the scan is abandoned.
    pub page_retries: u32,
    /// Backoff unit between attempts; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl ScanOptions {
    /// Keys-only pages of `page_size`.
    pub fn keys(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            keys_only: true,
            page_retries: 0,
            retry_backoff: Duration::ZERO,
        }
    }

    /// Full-entity pages of `page_size`.
    pub fn entities(page_size: usize) -> Self {
        Self {
            keys_only: false,
            ..Self::keys(page_size)
        }
    }

    pub fn with_retries(mut self, page_retries: u32, retry_backoff: Duration) -> Self {
        self.page_retries = page_retries;
        self.retry_backoff = retry_backoff;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Ready,
    Exhausted,
}

/// What a finished (or abandoned) scan saw.
#[derive(Debug, Default)]
pub struct ScanSummary {
    /// Pages yielded.
    pub pages: u64,
    /// Entries yielded across all pages.
    pub entries: u64,
    /// Queries issued, including retries.
    pub queries: u64,
    /// Set when a page could not be fetched and the scan was abandoned.
    pub error: Option<StoreError>,
}

/// Lazy, finite, non-restartable page sequence for one `(namespace, kind)`.
///
/// The scan ends when a page is empty, when a page is shorter than the page
/// size, when the store returns no continuation token (or the same token
/// again), or when a page still fails after its retries. Once ended, every
/// further call to [`next_page`](Self::next_page) returns `None`.
pub struct PageScanner {
    store: Arc<dyn Datastore>,
    namespace: String,
    kind: String,
    order: Option<String>,
    options: ScanOptions,
    cursor: Option<Cursor>,
    state: ScanState,
    summary: ScanSummary,
}

impl PageScanner {
    pub fn new(
        store: Arc<dyn Datastore>,
        namespace: impl Into<String>,
        kind: &KindInfo,
        options: ScanOptions,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            kind: kind.kind.clone(),
            order: kind.order.clone(),
            options,
            cursor: None,
            state: ScanState::Ready,
            summary: ScanSummary::default(),
        }
    }

    fn query(&self) -> Query {
        let query = Query::new(self.kind.clone(), self.namespace.clone())
            .order(self.order.clone())
            .start(self.cursor.clone())
            .limit(self.options.page_size);
        if self.options.keys_only {
            query.keys_only()
        } else {
            query
        }
    }

    async fn fetch(&mut self) -> StoreResult<QueryBatch> {
        let query = self.query();
        let mut attempt = 0;
        loop {
            self.summary.queries += 1;
            match self.store.run_query(&query).await {
                Ok(batch) => return Ok(batch),
                Err(e) if attempt < self.options.page_retries => {
                    attempt += 1;
                    tracing::warn!(
                        namespace = %self.namespace,
                        kind = %self.kind,
                        attempt = attempt,
                        error = %e,
                        "Page fetch failed, retrying"
                    );
                    tokio::time::sleep(self.options.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch the next page. `None` once the kind is exhausted.
    pub async fn next_page(&mut self) -> Option<Vec<Entity>> {
        if self.state == ScanState::Exhausted {
            return None;
        }

        let batch = match self.fetch().await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(
                    namespace = %self.namespace,
                    kind = %self.kind,
                    pages = self.summary.pages,
                    error = %e,
                    "Abandoning scan after page fetch failure"
                );
                self.state = ScanState::Exhausted;
                self.summary.error = Some(e);
                return None;
            }
        };

        let count = batch.entities.len();
        if count == 0 {
            self.state = ScanState::Exhausted;
            return None;
        }

        self.summary.pages += 1;
        self.summary.entries += count as u64;

        match batch.end_cursor {
            Some(next) if count >= self.options.page_size && Some(&next) != self.cursor.as_ref() => {
                self.cursor = Some(next);
            }
            _ => self.state = ScanState::Exhausted,
        }

        Some(batch.entities)
    }

    /// Whether the scan has ended.
    pub fn is_exhausted(&self) -> bool {
        self.state == ScanState::Exhausted
    }

    pub fn summary(&self) -> &ScanSummary {
        &self.summary
    }

    pub fn into_summary(self) -> ScanSummary {
        self.summary
    }

    /// The scan as a stream of pages.
    ///
    /// An abandoned scan ends with one `Err` item carrying the page error.
    pub fn into_stream(self) -> impl Stream<Item = StoreResult<Vec<Entity>>> + Send {
        futures::stream::unfold(Some(self), |scanner| async move {
            let mut scanner = scanner?;
            match scanner.next_page().await {
                Some(page) => Some((Ok(page), Some(scanner))),
                None => scanner.summary.error.take().map(|e| (Err(e), None)),
            }
        })
    }
}
