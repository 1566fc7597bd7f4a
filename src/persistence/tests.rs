use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{TimeZone, Utc};
use tempfile::tempdir;

use super::{MemoryReadingStore, ReadingScope, ReadingStore, ScopeFactory, SledReadingStore};

fn at(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

#[tokio::test]
async fn test_memory_store_filters_by_user() {
    let store = MemoryReadingStore::new();
    store.add("user-1", 1.0, at(1)).await.unwrap();
    store.add("user-2", 2.0, at(2)).await.unwrap();
    store.add("user-1", 3.0, at(3)).await.unwrap();

    let readings = store.get_by_user("user-1").await.unwrap();
    let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![1.0, 3.0]);
    assert_eq!(store.all().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_memory_store_delete_by_user_returns_count() {
    let store = MemoryReadingStore::new();
    store.add("user-1", 1.0, at(1)).await.unwrap();
    store.add("user-1", 2.0, at(2)).await.unwrap();
    store.add("user-2", 5.0, at(3)).await.unwrap();

    assert_eq!(store.delete_by_user("user-1").await.unwrap(), 2);
    assert_eq!(store.delete_by_user("user-1").await.unwrap(), 0);
    assert!(store.get_by_user("user-1").await.unwrap().is_empty());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_memory_scopes_share_readings() {
    let store = MemoryReadingStore::new();
    {
        let scope = store.new_scope().unwrap();
        scope.add("user-1", 4.2, at(1)).await.unwrap();
    }
    let scope = store.new_scope().unwrap();
    assert_eq!(scope.get_by_user("user-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_scope_release_runs_on_drop() {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let scope = ReadingScope::with_release(Box::new(MemoryReadingStore::new()), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    scope.add("user-1", 1.0, at(1)).await.unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 0);

    drop(scope);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sled_store_keeps_insertion_order() {
    let dir = tempdir().unwrap();
    let store = SledReadingStore::open(dir.path().to_str().unwrap()).unwrap();

    store.add("user-1", 3.0, at(30)).await.unwrap();
    store.add("user-1", 1.0, at(10)).await.unwrap();
    store.add("user-1", 2.0, at(20)).await.unwrap();

    let values: Vec<f64> = store
        .get_by_user("user-1")
        .await
        .unwrap()
        .iter()
        .map(|r| r.value)
        .collect();
    assert_eq!(values, vec![3.0, 1.0, 2.0]);
}

#[tokio::test]
async fn test_sled_store_delete_by_user() {
    let store = SledReadingStore::temporary().unwrap();
    store.add("user-1", 1.0, at(1)).await.unwrap();
    store.add("user-1", 2.0, at(2)).await.unwrap();
    store.add("user-2", 7.5, at(3)).await.unwrap();

    assert_eq!(store.delete_by_user("user-1").await.unwrap(), 2);
    assert!(store.get_by_user("user-1").await.unwrap().is_empty());

    let remaining = store.all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].user_id, "user-2");
}

#[tokio::test]
async fn test_sled_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();

    {
        let store = SledReadingStore::open(&path).unwrap();
        store.add("user-1", 42.5, at(1)).await.unwrap();
        store.flush().await.unwrap();
    }

    let store = SledReadingStore::open(&path).unwrap();
    let readings = store.get_by_user("user-1").await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].value, 42.5);
    assert_eq!(readings[0].timestamp, at(1));
}
