use crate::{MemStorage, SqlStorage, Storage, StorageError};
use proptest::prelude::*;
use pulsemon_common::error::{Classify, ErrorKind};
use pulsemon_common::retry::RetryPolicy;
use pulsemon_common::types::{Metric, MetricKind};
use std::sync::Arc;
use tempfile::TempDir;

async fn sqlite_store() -> (TempDir, SqlStorage) {
    let dir = TempDir::new().unwrap();
    let dsn = format!("sqlite://{}?mode=rwc", dir.path().join("metrics.db").display());
    let store = SqlStorage::connect(&dsn)
        .await
        .unwrap()
        .with_retry_policy(RetryPolicy::once());
    (dir, store)
}

async fn check_counter_accumulates(store: &dyn Storage) {
    let first = store.add(&Metric::counter("PollCount", 3)).await.unwrap();
    assert_eq!(first.delta, Some(3));
    let second = store.add(&Metric::counter("PollCount", 4)).await.unwrap();
    assert_eq!(second.delta, Some(7));
    let stored = store.get(MetricKind::Counter, "PollCount").await.unwrap();
    assert_eq!(stored, Some(Metric::counter("PollCount", 7)));
}

async fn check_gauge_replaces(store: &dyn Storage) {
    store.add(&Metric::gauge("Alloc", 1.5)).await.unwrap();
    store.add(&Metric::gauge("Alloc", 233184.0)).await.unwrap();
    let stored = store.get(MetricKind::Gauge, "Alloc").await.unwrap().unwrap();
    assert!(stored.approx_eq(&Metric::gauge("Alloc", 233184.0)));
}

async fn check_kind_collision(store: &dyn Storage) {
    store.add(&Metric::gauge("x", 2.0)).await.unwrap();
    let counted = store.add(&Metric::counter("x", 5)).await.unwrap();
    assert_eq!(counted.delta, Some(5));
    assert!(store.get(MetricKind::Gauge, "x").await.unwrap().is_none());

    store.add(&Metric::gauge("x", 9.0)).await.unwrap();
    assert!(store.get(MetricKind::Counter, "x").await.unwrap().is_none());
    assert_eq!(store.get_all().await.unwrap().len(), 1);
}

async fn check_batch_is_atomic(store: &dyn Storage) {
    let bad = Metric {
        id: "broken".into(),
        mtype: MetricKind::Counter,
        delta: None,
        value: Some(1.0),
    };
    let err = store
        .add_batch(&[Metric::gauge("a", 1.0), bad])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputInvalid);
    assert!(store.get_all().await.unwrap().is_empty());

    store
        .add_batch(&[
            Metric::counter("c", 1),
            Metric::gauge("b", 0.5),
            Metric::counter("c", 2),
        ])
        .await
        .unwrap();
    let all = store.get_all().await.unwrap();
    let ids: Vec<_> = all.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["b", "c"]);
    assert_eq!(all[1].delta, Some(3));
}

#[tokio::test]
async fn mem_counter_accumulates() {
    check_counter_accumulates(&MemStorage::new()).await;
}

#[tokio::test]
async fn mem_gauge_replaces() {
    check_gauge_replaces(&MemStorage::new()).await;
}

#[tokio::test]
async fn mem_kind_collision_replaces_entry() {
    check_kind_collision(&MemStorage::new()).await;
}

#[tokio::test]
async fn mem_batch_is_atomic() {
    check_batch_is_atomic(&MemStorage::new()).await;
}

#[tokio::test]
async fn mem_get_unknown_is_none() {
    let store = MemStorage::new();
    assert!(store.get(MetricKind::Gauge, "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn mem_counter_wraps_on_overflow() {
    let store = MemStorage::new();
    store.add(&Metric::counter("c", i64::MAX)).await.unwrap();
    let wrapped = store.add(&Metric::counter("c", 1)).await.unwrap();
    assert_eq!(wrapped.delta, Some(i64::MIN));
}

#[tokio::test]
async fn mem_ping_is_unsupported() {
    let err = MemStorage::new().ping().await.unwrap_err();
    assert!(matches!(err, StorageError::Unsupported("ping")));
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[tokio::test]
async fn mem_snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.json");

    let store = MemStorage::with_snapshot_file(&path, false);
    store.add(&Metric::counter("PollCount", 10)).await.unwrap();
    store.add(&Metric::gauge("RandomValue", 0.25)).await.unwrap();
    assert!(!path.exists());
    store.snapshot().await.unwrap();

    let restored = MemStorage::with_snapshot_file(&path, false);
    restored.restore().await.unwrap();
    assert_eq!(restored.get_all().await.unwrap(), store.get_all().await.unwrap());
}

#[tokio::test]
async fn mem_sync_flush_writes_on_every_mutation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.json");
    let store = MemStorage::with_snapshot_file(&path, true);
    store.add(&Metric::gauge("g", 1.0)).await.unwrap();

    let on_disk: Vec<Metric> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk, vec![Metric::gauge("g", 1.0)]);
}

#[tokio::test]
async fn mem_restore_without_file_starts_empty() {
    let dir = TempDir::new().unwrap();
    let store = MemStorage::with_snapshot_file(dir.path().join("absent.json"), false);
    store.restore().await.unwrap();
    assert!(store.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn mem_restore_rejects_corrupt_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.json");
    std::fs::write(&path, "{not json").unwrap();
    let store = MemStorage::with_snapshot_file(&path, false);
    assert!(matches!(store.restore().await, Err(StorageError::Json(_))));
}

#[tokio::test]
async fn mem_snapshot_into_missing_dir_fails_without_retry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("metrics.json");
    let store = MemStorage::with_snapshot_file(&path, false).with_retry_policy(RetryPolicy::once());
    let err = store.snapshot().await.unwrap_err();
    assert!(matches!(err, StorageError::Io { .. }));
}

#[tokio::test]
async fn mem_failed_sync_flush_keeps_the_update() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing").join("metrics.json");
    let store = MemStorage::with_snapshot_file(&path, true).with_retry_policy(RetryPolicy::once());

    let stored = store.add(&Metric::counter("c", 5)).await.unwrap();
    assert_eq!(stored, Metric::counter("c", 5));
    store
        .add_batch(&[Metric::counter("c", 2), Metric::gauge("g", 1.0)])
        .await
        .unwrap();

    assert_eq!(
        store.get(MetricKind::Counter, "c").await.unwrap(),
        Some(Metric::counter("c", 7))
    );
    assert!(!path.exists());

    std::fs::create_dir(path.parent().unwrap()).unwrap();
    store.add(&Metric::counter("c", 1)).await.unwrap();
    let saved: Vec<Metric> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert!(saved.contains(&Metric::counter("c", 8)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mem_concurrent_counter_adds_are_not_lost() {
    let store = Arc::new(MemStorage::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                store.add(&Metric::counter("hits", 1)).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let total = store.get(MetricKind::Counter, "hits").await.unwrap();
    assert_eq!(total, Some(Metric::counter("hits", 400)));
}

#[tokio::test]
async fn sql_counter_accumulates() {
    let (_dir, store) = sqlite_store().await;
    check_counter_accumulates(&store).await;
}

#[tokio::test]
async fn sql_gauge_replaces() {
    let (_dir, store) = sqlite_store().await;
    check_gauge_replaces(&store).await;
}

#[tokio::test]
async fn sql_kind_collision_replaces_entry() {
    let (_dir, store) = sqlite_store().await;
    check_kind_collision(&store).await;
}

#[tokio::test]
async fn sql_batch_is_atomic() {
    let (_dir, store) = sqlite_store().await;
    check_batch_is_atomic(&store).await;
}

#[tokio::test]
async fn sql_ping_and_snapshot_noops() {
    let (_dir, store) = sqlite_store().await;
    store.ping().await.unwrap();
    store.snapshot().await.unwrap();
    store.restore().await.unwrap();
}

#[tokio::test]
async fn sql_rows_survive_reconnect() {
    let dir = TempDir::new().unwrap();
    let dsn = format!("sqlite://{}?mode=rwc", dir.path().join("metrics.db").display());

    let store = SqlStorage::connect(&dsn).await.unwrap();
    store.add(&Metric::counter("c", 2)).await.unwrap();
    store.close().await.unwrap();

    let reopened = SqlStorage::connect(&dsn).await.unwrap();
    let total = reopened.add(&Metric::counter("c", 2)).await.unwrap();
    assert_eq!(total.delta, Some(4));
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn counter_total_is_sum_of_deltas(deltas in proptest::collection::vec(-1_000_000i64..1_000_000, 1..40)) {
        let total = runtime().block_on(async {
            let store = MemStorage::new();
            for d in &deltas {
                store.add(&Metric::counter("c", *d)).await.unwrap();
            }
            store.get(MetricKind::Counter, "c").await.unwrap()
        });
        prop_assert_eq!(total, Some(Metric::counter("c", deltas.iter().sum::<i64>())));
    }

    #[test]
    fn gauge_keeps_last_write(values in proptest::collection::vec(-1.0e9f64..1.0e9, 1..40)) {
        let stored = runtime().block_on(async {
            let store = MemStorage::new();
            for v in &values {
                store.add(&Metric::gauge("g", *v)).await.unwrap();
            }
            store.get(MetricKind::Gauge, "g").await.unwrap()
        });
        let last = *values.last().unwrap();
        prop_assert!(stored.unwrap().approx_eq(&Metric::gauge("g", last)));
    }
}
