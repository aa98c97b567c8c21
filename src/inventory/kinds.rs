use std::sync::Arc;

use crate::{
    pipeline::{PageScanner, ScanOptions},
    store::{Datastore, KIND_METADATA, StoreResult},
};

/// Marker wrapping system-reserved kind names, e.g. `__Stat_Total__`.
pub const RESERVED_MARKER: &str = "__";

const METADATA_PAGE_SIZE: usize = 1000;

/// Work descriptor for one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindInfo {
    pub kind: String,
    /// Ascending ordering property used to keep cursors stable.
    pub order: Option<String>,
    /// Reserved for a per-kind property filter; not applied to queries.
    pub filter: Option<String>,
}

impl KindInfo {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            order: None,
            filter: None,
        }
    }

    pub fn with_order(mut self, order: Option<String>) -> Self {
        self.order = order;
        self
    }
}

/// Whether `kind` is a system-reserved kind (`__Name__`).
///
/// The prefix and suffix markers must not overlap, so names shorter than twice
/// the marker length are never reserved.
pub fn is_reserved_kind(kind: &str) -> bool {
    kind.len() >= RESERVED_MARKER.len() * 2
        && kind.starts_with(RESERVED_MARKER)
        && kind.ends_with(RESERVED_MARKER)
}

/// List the non-reserved kinds of `namespace`, in store order.
pub async fn list_kinds(store: &Arc<dyn Datastore>, namespace: &str) -> StoreResult<Vec<String>> {
    let metadata = KindInfo::new(KIND_METADATA);
    let mut scanner = PageScanner::new(
        store.clone(),
        namespace,
        &metadata,
        ScanOptions::keys(METADATA_PAGE_SIZE),
    );

    let mut kinds = Vec::new();
    while let Some(page) = scanner.next_page().await {
        kinds.extend(
            page.into_iter()
                .filter_map(|entity| entity.key.name_str().map(str::to_string))
                .filter(|kind| !is_reserved_kind(kind)),
        );
    }

    if let Some(e) = scanner.into_summary().error {
        return Err(e);
    }

    tracing::debug!(namespace = %namespace, kinds = ?kinds, "Listed kinds");
    Ok(kinds)
}
