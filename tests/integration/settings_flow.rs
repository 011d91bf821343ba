//! Versioned settings scenarios: CAS races, batches, cache propagation

use std::sync::Arc;

use assert_matches::assert_matches;
use node_monitoring::settings::SettingsCache;
use node_monitoring::storage::{Setting, SettingScope, StorageError};
use serde_json::json;

use crate::helpers::create_backend;

#[tokio::test]
async fn test_concurrent_cas_has_exactly_one_winner() {
    let (_tmp, _path, store) = create_backend().await;

    let mut seed = Setting::system("rate.limit", json!(100));
    store.upsert_setting(&mut seed).await.unwrap();
    assert_eq!(seed.version, 1);

    // Two writers race from the same observed version.
    let store_a = store.clone();
    let mut setting_a = seed.clone();
    setting_a.value = json!(110);
    let task_a = tokio::spawn(async move { store_a.update_setting(&mut setting_a).await });

    let store_b = store.clone();
    let mut setting_b = seed.clone();
    setting_b.value = json!(120);
    let task_b = tokio::spawn(async move { store_b.update_setting(&mut setting_b).await });

    let results = [task_a.await.unwrap(), task_b.await.unwrap()];
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);

    // The loser learns the post-success version.
    let loser = results.into_iter().find(|r| r.is_err()).unwrap();
    assert_matches!(
        loser.unwrap_err(),
        StorageError::VersionConflict { current: 2 }
    );

    let stored = store
        .get_setting("rate.limit", SettingScope::System, None)
        .await
        .unwrap();
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn test_batch_conflict_rolls_everything_back() {
    let (_tmp, _path, store) = create_backend().await;

    let mut a = Setting::system("a", json!(1));
    let mut b = Setting::system("b", json!(2));
    store.upsert_setting(&mut a).await.unwrap();
    store.upsert_setting(&mut b).await.unwrap();

    a.value = json!(100);
    b.value = json!(200);
    b.version = 42;

    let err = store.batch_update_settings(&mut [a, b]).await.unwrap_err();
    assert_matches!(err, StorageError::VersionConflict { .. });

    let a_stored = store.get_setting("a", SettingScope::System, None).await.unwrap();
    let b_stored = store.get_setting("b", SettingScope::System, None).await.unwrap();
    assert_eq!(a_stored.value, json!(1));
    assert_eq!(b_stored.value, json!(2));
}

#[tokio::test]
async fn test_batch_success_bumps_every_entry() {
    let (_tmp, _path, store) = create_backend().await;

    let mut a = Setting::system("a", json!(1));
    let mut b = Setting::system("b", json!(2));
    store.upsert_setting(&mut a).await.unwrap();
    store.upsert_setting(&mut b).await.unwrap();

    a.value = json!(10);
    b.value = json!(20);
    let mut batch = [a, b];
    store.batch_update_settings(&mut batch).await.unwrap();

    assert_eq!(batch[0].version, 2);
    assert_eq!(batch[1].version, 2);
    assert_eq!(store.get_global_version().await.unwrap(), 2);
}

#[tokio::test]
async fn test_cache_sees_store_writes_after_refresh() {
    let (_tmp, _path, store) = create_backend().await;
    let cache = SettingsCache::new(store.clone()).await;

    let mut s = Setting::system("feature.flag", json!(true));
    store.upsert_setting(&mut s).await.unwrap();

    // Not visible yet: the write bypassed the cache.
    assert!(!cache.get_bool("feature.flag", false));

    cache.refresh().await.unwrap();
    assert!(cache.get_bool("feature.flag", false));
    assert_eq!(cache.version(), s.version);
}

#[tokio::test]
async fn test_cache_set_persists_through_store() {
    let (_tmp, _path, store) = create_backend().await;
    let cache = Arc::new(SettingsCache::new(store.clone()).await);

    cache.set("poll.interval", json!(30)).await.unwrap();

    let stored = store
        .get_setting("poll.interval", SettingScope::System, None)
        .await
        .unwrap();
    assert_eq!(stored.value, json!(30));
    assert_eq!(stored.version, 1);
    assert_eq!(cache.get_i64("poll.interval", 0), 30);
}
