//! Bounded-size bulk mutations.

use std::sync::Arc;

use crate::{
    observability::metrics,
    store::{Datastore, Entity, Key, StoreResult},
};

/// Largest write batch accepted by [`WriteMutator`].
pub const MAX_WRITE_BATCH: usize = 500;

/// Best-effort bulk deleter.
///
/// A failed batch is logged and left behind: it is neither counted nor retried.
pub struct DeleteMutator {
    store: Arc<dyn Datastore>,
    max_batch: usize,
    dry_run: bool,
    deleted: u64,
    failed_records: u64,
    failed_batches: u64,
}

impl DeleteMutator {
    pub fn new(store: Arc<dyn Datastore>, max_batch: usize, dry_run: bool) -> Self {
        Self {
            store,
            max_batch: max_batch.max(1),
            dry_run,
            deleted: 0,
            failed_records: 0,
            failed_batches: 0,
        }
    }

    /// Delete `keys`, in chunks of at most `max_batch`.
    ///
    /// Returns the number of keys counted as deleted.
    pub async fn apply(&mut self, keys: &[Key]) -> u64 {
        let mut applied = 0;
        for batch in keys.chunks(self.max_batch) {
            if self.dry_run {
                applied += batch.len() as u64;
                continue;
            }
            match self.store.delete_multi(batch).await {
                Ok(()) => applied += batch.len() as u64,
                Err(e) => {
                    self.failed_batches += 1;
                    self.failed_records += batch.len() as u64;
                    metrics::record_batch_failure("delete");
                    tracing::error!(
                        batch_size = batch.len(),
                        first_key = %batch[0],
                        error = %e,
                        "Failed to delete batch"
                    );
                }
            }
        }
        self.deleted += applied;
        applied
    }

    pub fn deleted(&self) -> u64 {
        self.deleted
    }

    pub fn failed_records(&self) -> u64 {
        self.failed_records
    }

    pub fn failed_batches(&self) -> u64 {
        self.failed_batches
    }
}

/// Buffered bulk writer. Flush failures are returned to the caller.
pub struct WriteMutator {
    store: Arc<dyn Datastore>,
    batch_size: usize,
    pending: Vec<Entity>,
    written: u64,
}

impl WriteMutator {
    pub fn new(store: Arc<dyn Datastore>, batch_size: usize) -> Self {
        let batch_size = batch_size.clamp(1, MAX_WRITE_BATCH);
        Self {
            store,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            written: 0,
        }
    }

    /// Buffer one entity, flushing when the batch is full.
    pub async fn push(&mut self, entity: Entity) -> StoreResult<()> {
        self.pending.push(entity);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write whatever is buffered.
    pub async fn flush(&mut self) -> StoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.store.put_multi(&self.pending).await?;
        self.written += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn keys(kind: &str, count: i64) -> Vec<Key> {
        (1..=count).map(|id| Key::id(kind, "ns", id)).collect()
    }

    #[tokio::test]
    async fn test_delete_counts_successful_batches() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(keys("Person", 25).into_iter().map(Entity::new))
            .await;

        let mut mutator = DeleteMutator::new(store.clone(), 10, false);
        assert_eq!(mutator.apply(&keys("Person", 25)).await, 25);
        assert_eq!(mutator.deleted(), 25);
        assert_eq!(store.count("ns", "Person").await, 0);
        assert_eq!(store.stats().delete_calls, 3);
    }

    #[tokio::test]
    async fn test_failed_delete_is_not_counted() {
        let store = Arc::new(MemoryStore::new());
        store.fail_deletes("Person");

        let mut mutator = DeleteMutator::new(store.clone(), 10, false);
        assert_eq!(mutator.apply(&keys("Person", 15)).await, 0);
        assert_eq!(mutator.deleted(), 0);
        assert_eq!(mutator.failed_batches(), 2);
        assert_eq!(mutator.failed_records(), 15);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_deleting() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(keys("Person", 5).into_iter().map(Entity::new))
            .await;

        let mut mutator = DeleteMutator::new(store.clone(), 10, true);
        assert_eq!(mutator.apply(&keys("Person", 5)).await, 5);
        assert_eq!(store.count("ns", "Person").await, 5);
        assert_eq!(store.stats().delete_calls, 0);
    }

    #[tokio::test]
    async fn test_write_flushes_full_batches_and_remainder() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = WriteMutator::new(store.clone(), 4);

        for key in keys("Person", 10) {
            writer.push(Entity::new(key)).await.unwrap();
        }
        assert_eq!(writer.written(), 8);
        assert_eq!(writer.pending(), 2);

        writer.flush().await.unwrap();
        assert_eq!(writer.written(), 10);
        assert_eq!(store.stats().put_calls, 3);
        assert_eq!(store.count("ns", "Person").await, 10);
    }

    #[tokio::test]
    async fn test_write_batch_is_capped() {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteMutator::new(store, 10_000);
        assert_eq!(writer.batch_size, MAX_WRITE_BATCH);
    }

    #[tokio::test]
    async fn test_write_failure_is_returned() {
        let store = Arc::new(MemoryStore::new());
        store.fail_puts();

        let mut writer = WriteMutator::new(store, 2);
        writer.push(Entity::new(Key::id("Person", "ns", 1))).await.unwrap();
        assert!(writer.push(Entity::new(Key::id("Person", "ns", 2))).await.is_err());
    }
}
