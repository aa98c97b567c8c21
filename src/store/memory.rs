use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use tokio::sync::RwLock;

use super::{
    Cursor, Datastore, Entity, KIND_METADATA, Key, NAMESPACE_METADATA, Properties, Query,
    QueryBatch, StoreError, StoreResult,
};

type KindTable = BTreeMap<Key, Properties>;

/// In-process store.
///
/// Queries follow Datastore semantics closely enough to exercise the drain
/// loop: results are ordered by `(order property, key)`, entities missing the
/// order property are not returned, and cursors encode the position of the
/// last returned entity so deletes behind a cursor never shift later pages.
///
/// Failures and latency can be injected per kind for testing.
#[derive(Default)]
pub struct MemoryStore {
    /// namespace -> kind -> key -> properties
    data: RwLock<BTreeMap<String, BTreeMap<String, KindTable>>>,
    faults: Mutex<Faults>,
    latency: Mutex<Option<(Duration, Duration)>>,
    queries: Mutex<HashMap<String, u64>>,
    delete_calls: AtomicU64,
    put_calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    /// kind -> (queries still allowed to succeed, failures after that)
    queries: HashMap<String, (u32, u32)>,
    /// kinds whose deletes always fail
    deletes: HashSet<String>,
    puts: bool,
}

/// Counters collected by a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// Queries issued, per namespace.
    pub queries: HashMap<String, u64>,
    pub delete_calls: u64,
    pub put_calls: u64,
    /// Highest number of store calls observed in flight at once.
    pub max_in_flight: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load entities from a JSON array file.
    pub async fn load_fixture(&self, path: impl AsRef<Path>) -> StoreResult<usize> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        let entities: Vec<Entity> =
            serde_json::from_str(&contents).map_err(|e| StoreError::Decode(e.to_string()))?;
        let count = entities.len();
        self.insert(entities).await;
        Ok(count)
    }

    /// Insert or replace entities.
    pub async fn insert(&self, entities: impl IntoIterator<Item = Entity>) {
        let mut data = self.data.write().await;
        for entity in entities {
            data.entry(entity.key.namespace.clone())
                .or_default()
                .entry(entity.key.kind.clone())
                .or_default()
                .insert(entity.key, entity.properties);
        }
    }

    /// Number of entities stored for a kind.
    pub async fn count(&self, namespace: &str, kind: &str) -> usize {
        let data = self.data.read().await;
        data.get(namespace)
            .and_then(|kinds| kinds.get(kind))
            .map_or(0, |table| table.len())
    }

    /// Fail the next `times` queries against `kind`.
    pub fn fail_queries(&self, kind: &str, times: u32) {
        self.fail_queries_after(kind, 0, times);
    }

    /// Let `successes` queries against `kind` through, then fail `times`.
    pub fn fail_queries_after(&self, kind: &str, successes: u32, times: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.queries.insert(kind.to_string(), (successes, times));
        }
    }

    /// Fail every delete that touches `kind`.
    pub fn fail_deletes(&self, kind: &str) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.deletes.insert(kind.to_string());
        }
    }

    /// Fail every put.
    pub fn fail_puts(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.puts = true;
        }
    }

    /// Sleep a random duration in `[min, max]` on every call.
    pub fn set_latency(&self, min: Duration, max: Duration) {
        if let Ok(mut latency) = self.latency.lock() {
            *latency = Some((min, max));
        }
    }

    pub fn stats(&self) -> MemoryStoreStats {
        MemoryStoreStats {
            queries: self.queries.lock().map(|q| q.clone()).unwrap_or_default(),
            delete_calls: self.delete_calls.load(Ordering::SeqCst),
            put_calls: self.put_calls.load(Ordering::SeqCst),
            max_in_flight: self.max_in_flight.load(Ordering::SeqCst),
        }
    }

    async fn enter(&self) -> InFlight<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self
            .latency
            .lock()
            .ok()
            .and_then(|latency| *latency)
            .map(|(min, max)| {
                if max > min {
                    rand::thread_rng().gen_range(min..=max)
                } else {
                    min
                }
            });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        InFlight(&self.in_flight)
    }

    fn take_query_fault(&self, kind: &str) -> bool {
        let Ok(mut faults) = self.faults.lock() else {
            return false;
        };
        match faults.queries.get_mut(kind) {
            Some((successes, _)) if *successes > 0 => {
                *successes -= 1;
                false
            }
            Some((_, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    /// Candidate entities for a query, already ordered.
    async fn candidates(&self, query: &Query) -> Vec<(String, Entity)> {
        let data = self.data.read().await;

        match query.kind.as_str() {
            NAMESPACE_METADATA => data
                .iter()
                .filter(|(_, kinds)| kinds.values().any(|table| !table.is_empty()))
                .map(|(namespace, _)| {
                    let key = if namespace.is_empty() {
                        Key::id(NAMESPACE_METADATA, "", 1)
                    } else {
                        Key::name(NAMESPACE_METADATA, "", namespace.clone())
                    };
                    (String::new(), Entity::new(key))
                })
                .collect(),
            KIND_METADATA => data
                .get(&query.namespace)
                .into_iter()
                .flat_map(|kinds| kinds.iter())
                .filter(|(_, table)| !table.is_empty())
                .map(|(kind, _)| {
                    let key = Key::name(KIND_METADATA, query.namespace.clone(), kind.clone());
                    (String::new(), Entity::new(key))
                })
                .collect(),
            kind => {
                let Some(table) = data.get(&query.namespace).and_then(|kinds| kinds.get(kind))
                else {
                    return Vec::new();
                };
                let mut rows: Vec<(String, Entity)> = table
                    .iter()
                    .filter_map(|(key, properties)| {
                        let sort_value = match &query.order {
                            Some(property) => properties.get(property)?.to_string(),
                            None => String::new(),
                        };
                        Some((
                            sort_value,
                            Entity {
                                key: key.clone(),
                                properties: properties.clone(),
                            },
                        ))
                    })
                    .collect();
                rows.sort_by(|a, b| (&a.0, &a.1.key).cmp(&(&b.0, &b.1.key)));
                rows
            }
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn encode_position(sort_value: &str, key: &Key) -> StoreResult<Cursor> {
    let raw = serde_json::to_string(&(sort_value, key))
        .map_err(|e| StoreError::Internal(e.to_string()))?;
    Cursor::from_wire(URL_SAFE_NO_PAD.encode(raw.as_bytes()))
        .ok_or_else(|| StoreError::Internal("empty cursor".to_string()))
}

fn decode_position(cursor: &Cursor) -> StoreResult<(String, Key)> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.as_str())
        .map_err(|e| StoreError::Decode(format!("invalid cursor: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode(format!("invalid cursor: {e}")))
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn run_query(&self, query: &Query) -> StoreResult<QueryBatch> {
        let _guard = self.enter().await;

        if let Ok(mut queries) = self.queries.lock() {
            *queries.entry(query.namespace.clone()).or_default() += 1;
        }

        if self.take_query_fault(&query.kind) {
            return Err(StoreError::Injected(format!(
                "query against kind {}",
                query.kind
            )));
        }

        let start = query.start.as_ref().map(decode_position).transpose()?;
        let limit = query.limit.unwrap_or(usize::MAX);

        let page: Vec<(String, Entity)> = self
            .candidates(query)
            .await
            .into_iter()
            .filter(|(sort_value, entity)| match &start {
                Some((start_value, start_key)) => {
                    (sort_value, &entity.key) > (start_value, start_key)
                }
                None => true,
            })
            .take(limit)
            .collect();

        let end_cursor = match page.last() {
            Some((sort_value, entity)) => Some(encode_position(sort_value, &entity.key)?),
            None => query.start.clone(),
        };

        let entities = page
            .into_iter()
            .map(|(_, mut entity)| {
                if query.keys_only {
                    entity.properties.clear();
                }
                entity
            })
            .collect();

        Ok(QueryBatch {
            entities,
            end_cursor,
        })
    }

    async fn lookup(&self, key: &Key) -> StoreResult<Option<Entity>> {
        let _guard = self.enter().await;
        let data = self.data.read().await;

        Ok(data
            .get(&key.namespace)
            .and_then(|kinds| kinds.get(&key.kind))
            .and_then(|table| table.get(key))
            .map(|properties| Entity {
                key: key.clone(),
                properties: properties.clone(),
            }))
    }

    async fn delete_multi(&self, keys: &[Key]) -> StoreResult<()> {
        let _guard = self.enter().await;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .faults
            .lock()
            .map(|faults| keys.iter().find(|k| faults.deletes.contains(&k.kind)).cloned())
            .unwrap_or(None);
        if let Some(key) = failing {
            return Err(StoreError::Injected(format!("delete of {key}")));
        }

        let mut data = self.data.write().await;
        for key in keys {
            if let Some(table) = data
                .get_mut(&key.namespace)
                .and_then(|kinds| kinds.get_mut(&key.kind))
            {
                table.remove(key);
            }
        }
        Ok(())
    }

    async fn put_multi(&self, entities: &[Entity]) -> StoreResult<()> {
        let _guard = self.enter().await;
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        if self.faults.lock().map(|f| f.puts).unwrap_or(false) {
            return Err(StoreError::Injected("put".to_string()));
        }

        self.insert(entities.iter().cloned()).await;
        Ok(())
    }
}
