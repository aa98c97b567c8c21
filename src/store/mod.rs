//! Namespaced key-value store seam.
//!
//! Everything above this module talks to the store through the [`Datastore`]
//! trait. Two implementations are provided:
//!
//! - [`RestDatastore`]: Cloud Datastore v1 REST API (also works against the emulator)
//! - [`MemoryStore`]: in-process store used for local dry runs and tests
//!
//! Kind and namespace enumeration are regular queries against the `__kind__`
//! and `__namespace__` metadata kinds; see [`crate::inventory`].

mod datastore;
mod error;
mod memory;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
pub use datastore::RestDatastore;
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryStore, MemoryStoreStats};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;

/// Metadata kind listing the kinds of a namespace.
pub const KIND_METADATA: &str = "__kind__";

/// Metadata kind listing the namespaces of a project.
pub const NAMESPACE_METADATA: &str = "__namespace__";

/// Identifier part of a key. Exactly one of numeric id or name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyId {
    Id(i64),
    Name(String),
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Id(id) => write!(f, "{id}"),
            KeyId::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// A complete entity key.
///
/// `parent` carries the ancestor path; every element of the chain lives in the
/// same namespace as the key itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub kind: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(flatten)]
    pub id: KeyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<Key>>,
}

impl Key {
    /// Create a key with a numeric id.
    pub fn id(kind: impl Into<String>, namespace: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            id: KeyId::Id(id),
            parent: None,
        }
    }

    /// Create a key with a string name.
    pub fn name(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            id: KeyId::Name(name.into()),
            parent: None,
        }
    }

    /// Attach an ancestor.
    pub fn with_parent(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// The same key path rebuilt under another namespace.
    ///
    /// Kind, id/name discrimination and the ancestor chain are preserved.
    pub fn in_namespace(&self, namespace: &str) -> Key {
        Key {
            kind: self.kind.clone(),
            namespace: namespace.to_string(),
            id: self.id.clone(),
            parent: self
                .parent
                .as_ref()
                .map(|parent| Box::new(parent.in_namespace(namespace))),
        }
    }

    /// Name of the key, if it is a named key.
    pub fn name_str(&self) -> Option<&str> {
        match &self.id {
            KeyId::Name(name) => Some(name),
            KeyId::Id(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent}/")?;
        }
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Ordered property map. Order is the order the store returned.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// A record: key plus its property set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: Key,
    #[serde(default)]
    pub properties: Properties,
}

impl Entity {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: Properties::new(),
        }
    }

    /// Add a property, keeping insertion order.
    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// Opaque continuation token for a paginated query.
///
/// An empty wire token means "end of sequence" and never becomes a `Cursor`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    /// Build a cursor from a wire token. Returns `None` for an empty token.
    pub fn from_wire(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A bounded query over one kind of one namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub kind: String,
    pub namespace: String,
    /// Ascending order property.
    pub order: Option<String>,
    /// Start after this position. `None` means start of sequence.
    pub start: Option<Cursor>,
    pub limit: Option<usize>,
    pub keys_only: bool,
}

impl Query {
    pub fn new(kind: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn order(mut self, property: Option<String>) -> Self {
        self.order = property;
        self
    }

    pub fn start(mut self, cursor: Option<Cursor>) -> Self {
        self.start = cursor;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    pub entities: Vec<Entity>,
    /// Position after the last returned entity. `None` when the store returned
    /// no usable continuation token.
    pub end_cursor: Option<Cursor>,
}

/// Namespaced store client.
///
/// Implementations must be thread-safe; the worker pool shares one handle
/// across all concurrent kind workers.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Run one bounded query and return a single page.
    async fn run_query(&self, query: &Query) -> StoreResult<QueryBatch>;

    /// Fetch one entity by key.
    async fn lookup(&self, key: &Key) -> StoreResult<Option<Entity>>;

    /// Delete all keys. Not atomic across keys.
    async fn delete_multi(&self, keys: &[Key]) -> StoreResult<()>;

    /// Upsert all entities. Not atomic across entities.
    async fn put_multi(&self, entities: &[Entity]) -> StoreResult<()>;
}

/// Create a store client from configuration.
pub async fn create_store(config: &StoreConfig) -> StoreResult<Arc<dyn Datastore>> {
    let store: Arc<dyn Datastore> = match config {
        StoreConfig::Datastore {
            project_id,
            endpoint,
            access_token,
            timeout_secs,
        } => Arc::new(RestDatastore::new(
            project_id,
            endpoint,
            access_token.clone(),
            std::time::Duration::from_secs(*timeout_secs),
        )?),
        StoreConfig::Memory { fixture } => {
            let store = MemoryStore::new();
            if let Some(path) = fixture {
                let loaded = store.load_fixture(path).await?;
                tracing::info!(path = ?path, entities = loaded, "Loaded memory store fixture");
            }
            Arc::new(store)
        }
    };

    Ok(store)
}

/// Read an integer property value in Datastore wire encoding.
///
/// Accepts `{"integerValue": "123"}` (the wire form, int64 as string) as well
/// as a bare JSON number.
pub fn integer_value(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::Object(map) => match map.get("integerValue")? {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_i64(),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_cursor_from_empty_wire_token() {
        assert!(Cursor::from_wire("").is_none());
        assert_eq!(Cursor::from_wire("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_in_namespace_preserves_numeric_id() {
        let key = Key::id("Person", "source", 42);
        let moved = key.in_namespace("dest");
        assert_eq!(moved.kind, "Person");
        assert_eq!(moved.namespace, "dest");
        assert_eq!(moved.id, KeyId::Id(42));
    }

    #[test]
    fn test_in_namespace_rekeys_parent_chain() {
        let key = Key::name("Visit", "source", "v1").with_parent(Key::id("Person", "source", 7));
        let moved = key.in_namespace("dest");
        let parent = moved.parent.unwrap();
        assert_eq!(parent.namespace, "dest");
        assert_eq!(parent.id, KeyId::Id(7));
        assert_eq!(moved.id, KeyId::Name("v1".to_string()));
    }

    #[test]
    fn test_key_serde_flattens_id() {
        let key = Key::id("Person", "ns", 42);
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json, json!({"kind": "Person", "namespace": "ns", "id": 42}));

        let named: Key =
            serde_json::from_value(json!({"kind": "Person", "name": "abc"})).unwrap();
        assert_eq!(named, Key::name("Person", "", "abc"));
    }

    #[test]
    fn test_key_display() {
        let key = Key::name("Visit", "ns", "v1").with_parent(Key::id("Person", "ns", 7));
        assert_eq!(key.to_string(), "Person:7/Visit:\"v1\"");
    }

    #[test]
    fn test_integer_value() {
        assert_eq!(integer_value(&json!({"integerValue": "123"})), Some(123));
        assert_eq!(integer_value(&json!({"integerValue": 5})), Some(5));
        assert_eq!(integer_value(&json!(9)), Some(9));
        assert_eq!(integer_value(&json!({"stringValue": "x"})), None);
    }
}
