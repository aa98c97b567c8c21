//! End-to-end tests across the purge and clone pipelines, run against the
//! in-memory store.

use std::{sync::Arc, time::Duration};

use rstest::rstest;
use serde_json::json;
use tempfile::TempDir;

use crate::{
    cloning::{CloneSettings, clone_namespace},
    config::PurgeConfig,
    inventory::list_kinds,
    purge::{
        CheckpointFile, DrainSettings, DriverExit, NamespaceOutcome, PurgeDriver, drain_kind,
        drain_namespace,
    },
    store::{Datastore, Entity, Key, MemoryStore},
};

async fn seed(store: &MemoryStore, namespace: &str, kind: &str, count: i64) {
    store
        .insert((1..=count).map(|id| {
            Entity::new(Key::id(kind, namespace, id)).with_property("created_at", json!(id))
        }))
        .await;
}

fn drain_settings(page_size: usize) -> DrainSettings {
    DrainSettings {
        page_size,
        page_retries: 2,
        retry_backoff: Duration::from_millis(1),
        progress_interval: 1000,
        dry_run: false,
    }
}

struct Files {
    dir: TempDir,
}

impl Files {
    async fn new(pending: &str, safe: &str) -> Self {
        let dir = TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("namespaces.txt"), pending)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("safeNamespaces.txt"), safe)
            .await
            .unwrap();
        Self { dir }
    }

    fn config(&self) -> PurgeConfig {
        let mut config = PurgeConfig {
            checkpoint_path: self.dir.path().join("namespaces.txt"),
            safe_list_path: self.dir.path().join("safeNamespaces.txt"),
            restart_delay_secs: 0,
            ..Default::default()
        };
        config.pagination.page_size = 100;
        config.pagination.retry_backoff_ms = 1;
        config
    }

    async fn pending(&self) -> Vec<String> {
        CheckpointFile::new(self.dir.path().join("namespaces.txt"))
            .load()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_safe_namespace_is_never_queried() {
    let files = Files::new("prod\nscratch\n", "prod\n").await;
    let store = Arc::new(MemoryStore::new());
    seed(&store, "prod", "Order", 50).await;
    seed(&store, "scratch", "Order", 50).await;

    let driver = PurgeDriver::new(store.clone(), files.config());
    let summary = driver.run_pass(1).await.unwrap();

    assert!(matches!(summary.namespaces[0].1, NamespaceOutcome::SafeSkipped));
    assert_eq!(store.stats().queries.get("prod"), None);
    assert_eq!(store.count("prod", "Order").await, 50);
    assert_eq!(store.count("scratch", "Order").await, 0);
    assert_eq!(files.pending().await, vec!["scratch"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_worker_pool_never_exceeds_cap() {
    let store = Arc::new(MemoryStore::new());
    store.set_latency(Duration::from_millis(1), Duration::from_millis(4));
    let kinds: Vec<String> = (0..12).map(|i| format!("Kind{i:02}")).collect();
    for kind in &kinds {
        seed(&store, "ns", kind, 30).await;
    }

    let report = drain_namespace(store.clone(), "ns", kinds, &drain_settings(10), 4).await;

    assert_eq!(report.total(), 360);
    assert!(store.stats().max_in_flight <= 4);
    assert!(store.stats().max_in_flight >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_totals_fold_under_random_latency() {
    let store = Arc::new(MemoryStore::new());
    store.set_latency(Duration::ZERO, Duration::from_millis(2));
    seed(&store, "ns", "Big", 10_000).await;
    seed(&store, "ns", "Medium", 5_000).await;

    let report = drain_namespace(
        store.clone(),
        "ns",
        vec!["Big".into(), "Medium".into(), "Empty".into()],
        &drain_settings(1000),
        4,
    )
    .await;

    assert_eq!(report.total(), 15_000);
    let mut per_kind: Vec<(String, u64)> = report
        .kinds
        .iter()
        .map(|k| (k.kind.clone(), k.deleted))
        .collect();
    per_kind.sort();
    assert_eq!(
        per_kind,
        vec![
            ("Big".to_string(), 10_000),
            ("Empty".to_string(), 0),
            ("Medium".to_string(), 5_000)
        ]
    );
}

#[tokio::test]
async fn test_redrain_of_empty_kind_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "ns", "Order", 25).await;

    let first = drain_kind(store.clone(), "ns".into(), "Order".into(), drain_settings(10)).await;
    assert_eq!(first.deleted, 25);
    let deletes_after_first = store.stats().delete_calls;
    let queries_after_first = store.stats().queries["ns"];

    let second = drain_kind(store.clone(), "ns".into(), "Order".into(), drain_settings(10)).await;
    assert_eq!(second.deleted, 0);
    assert_eq!(second.pages, 0);
    assert_eq!(store.stats().delete_calls, deletes_after_first);
    // One probe and one empty page.
    assert_eq!(store.stats().queries["ns"], queries_after_first + 2);
}

#[rstest]
#[case::numeric_id(Key::id("Invoice", "prod", 42))]
#[case::string_name(Key::name("Invoice", "prod", "abc"))]
#[case::with_ancestor(Key::id("Invoice", "prod", 7).with_parent(Key::name("Account", "prod", "acme")))]
#[tokio::test]
async fn test_clone_preserves_key_identity(#[case] key: Key) {
    let source = Arc::new(MemoryStore::new());
    let destination = Arc::new(MemoryStore::new());
    source
        .insert(vec![Entity::new(key.clone()).with_property("amount", json!(10))])
        .await;

    let report = clone_namespace(
        source,
        destination.clone(),
        "prod",
        "dev",
        &CloneSettings::default(),
    )
    .await
    .unwrap();
    assert_eq!(report.total(), 1);

    let expected = key.in_namespace("dev");
    assert_eq!(expected.namespace, "dev");
    assert_eq!(expected.id, key.id);
    let copy = destination.lookup(&expected).await.unwrap().unwrap();
    assert_eq!(copy.properties["amount"], json!(10));
}

#[tokio::test]
async fn test_reserved_kinds_are_never_enumerated() {
    let store: Arc<dyn Datastore> = {
        let memory = MemoryStore::new();
        seed(&memory, "ns", "__Stat_Total__", 3).await;
        seed(&memory, "ns", "Order", 3).await;
        Arc::new(memory)
    };

    assert_eq!(list_kinds(&store, "ns").await.unwrap(), vec!["Order"]);
}

#[tokio::test]
async fn test_driver_runs_until_checkpoint_is_empty() {
    let files = Files::new("a\nb\n\nc\n", "").await;
    let store = Arc::new(MemoryStore::new());
    seed(&store, "a", "Order", 250).await;
    seed(&store, "a", "Item", 40).await;
    seed(&store, "b", "Order", 10).await;

    let driver = PurgeDriver::new(store.clone(), files.config());
    let exit = driver.run().await.unwrap();

    // Pass 1 drains a and b and drops the already-empty c; pass 2 finds a and b empty.
    assert_eq!(exit, DriverExit::Completed { passes: 2 });
    assert!(files.pending().await.is_empty());
    assert_eq!(store.count("a", "Order").await, 0);
    assert_eq!(store.count("a", "Item").await, 0);
    assert_eq!(store.count("b", "Order").await, 0);
}

#[tokio::test]
async fn test_transient_page_failure_is_retried() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "ns", "Order", 30).await;
    // Probe and first page succeed, the second page fails once.
    store.fail_queries_after("Order", 2, 1);

    let report = drain_kind(store.clone(), "ns".into(), "Order".into(), drain_settings(10)).await;
    assert_eq!(report.deleted, 30);
    assert!(report.outcome.is_success());
}
