//! Ordering property discovery.

use crate::store::{Datastore, Properties, Query, StoreResult};

/// Property preferred for ordering when a record has it.
pub const PREFERRED_ORDER_PROPERTY: &str = "created_at";

/// Pick a property to order pagination of `kind` by.
///
/// Samples one record. An empty kind yields `Ok(None)`; a query failure is
/// returned so the caller can skip the kind instead of guessing.
pub async fn probe_ordering(
    store: &dyn Datastore,
    namespace: &str,
    kind: &str,
) -> StoreResult<Option<String>> {
    let batch = store
        .run_query(&Query::new(kind, namespace).limit(1))
        .await?;

    Ok(batch
        .entities
        .first()
        .and_then(|entity| choose_ordering(&entity.properties)))
}

/// `created_at` if present, otherwise the first property in store order.
pub fn choose_ordering(properties: &Properties) -> Option<String> {
    if properties.contains_key(PREFERRED_ORDER_PROPERTY) {
        return Some(PREFERRED_ORDER_PROPERTY.to_string());
    }
    properties.keys().next().cloned()
}
