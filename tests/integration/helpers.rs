//! Test helpers and utilities for integration tests

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use node_monitoring::storage::{MetricsRecord, StorageBackend, sqlite::SqliteBackend};

/// Open a fresh SQLite backend inside a temporary directory.
///
/// Returns the directory guard, the database path (for out-of-band
/// seeding), and the backend.
pub async fn create_backend() -> (tempfile::TempDir, PathBuf, Arc<dyn StorageBackend>) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let backend = SqliteBackend::new(&db_path).await.unwrap();
    (temp_dir, db_path, Arc::new(backend))
}

/// Create a raw metric record with derived-counter fields filled in.
pub fn raw_record(account: &str, node: &str, ts: DateTime<Utc>, total: i64) -> MetricsRecord {
    MetricsRecord {
        account_id: account.to_string(),
        node_id: node.to_string(),
        bucket_start: ts,
        requests_total: total,
        requests_success: total,
        response_time_sum_ms: total * 25,
        response_time_count: total,
        bytes_total: total * 512,
        input_tokens_total: total * 10,
        output_tokens_total: total * 30,
        ..Default::default()
    }
}

/// Insert a node row the monitoring core can look up. The nodes table is
/// owned by the proxy core, so tests seed it over a side connection.
pub async fn seed_node(db_path: &Path, node_id: &str, account_id: &str) {
    let options = sqlx::sqlite::SqliteConnectOptions::new().filename(db_path);
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    sqlx::query(
        "INSERT INTO nodes (id, account_id, disabled, base_url, check_method) \
         VALUES (?, ?, 0, 'https://upstream.example', 'api')",
    )
    .bind(node_id)
    .bind(account_id)
    .execute(&pool)
    .await
    .unwrap();

    pool.close().await;
}
