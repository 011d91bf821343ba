//! Ingest → rollup → retention pipeline scenarios

use chrono::{Duration, TimeZone, Utc};
use node_monitoring::storage::{Granularity, MetricsQuery};
use pretty_assertions::assert_eq;

use crate::helpers::{create_backend, raw_record};

#[tokio::test]
async fn test_ingest_then_query_window() {
    let (_tmp, _path, store) = create_backend().await;

    let t1 = Utc.with_ymd_and_hms(2025, 11, 25, 10, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2025, 11, 25, 10, 30, 0).unwrap();

    store.insert_metrics(raw_record("a1", "n1", t1, 5)).await.unwrap();
    store.insert_metrics(raw_record("a1", "n1", t2, 7)).await.unwrap();

    let rows = store
        .query_metrics(MetricsQuery {
            account_id: "a1".to_string(),
            node_id: Some("n1".to_string()),
            from: Some(t1),
            to: Some(t1 + Duration::hours(1)),
            granularity: Some(Granularity::Raw),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    let total: i64 = rows.iter().map(|r| r.requests_total).sum();
    assert_eq!(total, 12);
}

#[tokio::test]
async fn test_rollup_produces_single_hourly_bucket_without_doubling() {
    let (_tmp, _path, store) = create_backend().await;

    let hour = Utc.with_ymd_and_hms(2025, 11, 25, 10, 0, 0).unwrap();
    store.insert_metrics(raw_record("a1", "n1", hour, 5)).await.unwrap();
    store
        .insert_metrics(raw_record("a1", "n1", hour + Duration::minutes(30), 7))
        .await
        .unwrap();

    let window_end = hour + Duration::hours(1);
    store
        .aggregate_metrics(None, Granularity::Hourly, hour, window_end)
        .await
        .unwrap();
    store
        .aggregate_metrics(None, Granularity::Hourly, hour, window_end)
        .await
        .unwrap();

    let rows = store
        .query_metrics(MetricsQuery {
            account_id: "a1".to_string(),
            granularity: Some(Granularity::Hourly),
            from: Some(hour),
            to: Some(window_end),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].bucket_start, hour);
    assert_eq!(rows[0].requests_total, 12);
}

#[tokio::test]
async fn test_rollup_conserves_totals_across_buckets() {
    let (_tmp, _path, store) = create_backend().await;

    let base = Utc.with_ymd_and_hms(2025, 11, 25, 8, 0, 0).unwrap();
    let mut expected_total = 0i64;

    // Rows scattered over five hours with varying totals.
    for i in 0..20 {
        let ts = base + Duration::minutes(i * 17);
        let total = 1 + (i % 5);
        expected_total += total;
        store
            .insert_metrics(raw_record("a1", "n1", ts, total))
            .await
            .unwrap();
    }

    let window_end = base + Duration::hours(6);
    store
        .aggregate_metrics(None, Granularity::Hourly, base, window_end)
        .await
        .unwrap();

    let hourly = store
        .query_metrics(MetricsQuery {
            account_id: "a1".to_string(),
            granularity: Some(Granularity::Hourly),
            from: Some(base),
            to: Some(window_end),
            ..Default::default()
        })
        .await
        .unwrap();

    let hourly_total: i64 = hourly.iter().map(|r| r.requests_total).sum();
    assert_eq!(hourly_total, expected_total);

    // The same conservation holds one level up.
    store
        .aggregate_metrics(None, Granularity::Daily, base - Duration::hours(12), window_end)
        .await
        .unwrap();
    let daily = store
        .query_metrics(MetricsQuery {
            account_id: "a1".to_string(),
            granularity: Some(Granularity::Daily),
            from: Some(base - Duration::days(1)),
            to: Some(window_end),
            ..Default::default()
        })
        .await
        .unwrap();
    let daily_total: i64 = daily.iter().map(|r| r.requests_total).sum();
    assert_eq!(daily_total, expected_total);
}

#[tokio::test]
async fn test_retention_removes_only_expired_rows() {
    let (_tmp, _path, store) = create_backend().await;
    let now = Utc::now();

    store
        .insert_metrics(raw_record("a1", "n1", now - Duration::days(8), 3))
        .await
        .unwrap();
    store
        .insert_metrics(raw_record("a1", "n1", now - Duration::days(6), 4))
        .await
        .unwrap();

    store.cleanup_metrics(None, now).await.unwrap();

    let rows = store
        .query_metrics(MetricsQuery {
            account_id: "a1".to_string(),
            from: Some(now - Duration::days(30)),
            to: Some(now),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].requests_total, 4);
}

#[tokio::test]
async fn test_tenants_do_not_leak_between_queries() {
    let (_tmp, _path, store) = create_backend().await;
    let t = Utc.with_ymd_and_hms(2025, 11, 25, 10, 0, 0).unwrap();

    store.insert_metrics(raw_record("a1", "n1", t, 5)).await.unwrap();
    store.insert_metrics(raw_record("a2", "n1", t, 9)).await.unwrap();

    let rows = store
        .query_metrics(MetricsQuery {
            account_id: "a1".to_string(),
            from: Some(t - Duration::hours(1)),
            to: Some(t + Duration::hours(1)),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].requests_total, 5);
}
