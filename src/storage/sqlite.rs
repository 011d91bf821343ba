//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Rollup strategy
//!
//! Aggregation is a single `INSERT .. SELECT .. GROUP BY` whose conflict
//! clause overwrites every counter column with the freshly summed values.
//! The destination row is replaced, never incremented, which makes
//! re-running the same source window idempotent. Late rows outside the
//! chosen window are missed permanently; the scheduler's 2-hour overlap
//! narrows that gap for the raw tier.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{HealthCheckQuery, MetricsQuery, SettingsFilter, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    Granularity, HealthCheckRecord, MetricsRecord, NodeIdentity, RetentionPolicy, Setting,
    SettingDataType, SettingScope,
};

/// Limit applied when a caller pages with an offset but no explicit limit.
const PAGED_QUERY_DEFAULT_LIMIT: i64 = 500;

/// Counter columns shared by all four metric tables, in bind order.
const COUNTER_COLUMNS: &str = "requests_total, requests_success, requests_failed, \
     response_time_sum_ms, response_time_count, bytes_total, input_tokens_total, \
     output_tokens_total, first_byte_time_sum_ms, stream_duration_sum_ms";

/// SQLite storage backend
///
/// Stores metric rollups, health-check history, and settings in a local
/// SQLite database file. Suitable for single-process deployments; the
/// scheduler assumes it is the only rollup writer.
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
    retention: RetentionPolicy,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for optimal performance (WAL mode, etc.)
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
            retention: RetentionPolicy::default(),
        })
    }

    /// Replace the default retention horizons with operator overrides.
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Helper to convert timestamp to Unix milliseconds for SQLite
    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    /// Helper to convert Unix milliseconds from SQLite to DateTime
    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn metrics_from_row(row: &sqlx::sqlite::SqliteRow, has_created_at: bool) -> MetricsRecord {
        MetricsRecord {
            account_id: row.get("account_id"),
            node_id: row.get("node_id"),
            bucket_start: Self::millis_to_timestamp(row.get("bucket_ms")),
            requests_total: row.get("requests_total"),
            requests_success: row.get("requests_success"),
            requests_failed: row.get("requests_failed"),
            response_time_sum_ms: row.get("response_time_sum_ms"),
            response_time_count: row.get("response_time_count"),
            bytes_total: row.get("bytes_total"),
            input_tokens_total: row.get("input_tokens_total"),
            output_tokens_total: row.get("output_tokens_total"),
            first_byte_time_sum_ms: row.get("first_byte_time_sum_ms"),
            stream_duration_sum_ms: row.get("stream_duration_sum_ms"),
            created_at: if has_created_at {
                Some(Self::millis_to_timestamp(row.get("created_at")))
            } else {
                None
            },
        }
    }

    fn setting_from_row(row: &sqlx::sqlite::SqliteRow) -> StorageResult<Setting> {
        let scope_str: String = row.get("scope");
        let scope = scope_str.parse().unwrap_or(SettingScope::System);

        let account: String = row.get("account_id");
        let account_id = if account.is_empty() {
            None
        } else {
            Some(account)
        };

        let value_str: String = row.get("value");
        let value = serde_json::from_str(&value_str).map_err(|e| {
            StorageError::SerializationError(format!("failed to decode setting value: {}", e))
        })?;

        let data_type_str: String = row.get("data_type");
        let data_type = data_type_str.parse().unwrap_or(SettingDataType::String);

        Ok(Setting {
            key: row.get("key"),
            scope,
            account_id,
            value,
            data_type,
            category: row.get("category"),
            description: row.get("description"),
            is_secret: row.get::<i64, _>("is_secret") != 0,
            version: row.get("version"),
            updated_by: row.get("updated_by"),
            updated_at: Self::millis_to_timestamp(row.get("updated_at")),
            created_at: Self::millis_to_timestamp(row.get("created_at")),
        })
    }

    /// Destination-bucket expression over the source table's millisecond
    /// time column.
    fn bucket_expression(target: Granularity) -> &'static str {
        match target {
            Granularity::Hourly => "(ts / 3600000) * 3600000",
            Granularity::Daily => "(bucket_start / 86400000) * 86400000",
            Granularity::Monthly => {
                "CAST(strftime('%s', date(bucket_start / 1000, 'unixepoch', 'start of month')) \
                 AS INTEGER) * 1000"
            }
            Granularity::Raw => unreachable!("raw is never a rollup destination"),
        }
    }

    /// One CAS update executed on `conn`; shared by the single and
    /// batched update paths.
    async fn cas_update_setting(
        conn: &mut sqlx::SqliteConnection,
        setting: &mut Setting,
    ) -> StorageResult<()> {
        let now = Utc::now();
        let value_json = serde_json::to_string(&setting.value)?;
        let account = setting.account_key().to_string();

        let result = sqlx::query(
            r#"
            UPDATE settings SET
                value = ?, data_type = ?, category = ?, description = ?,
                is_secret = ?, updated_by = ?, updated_at = ?, version = version + 1
            WHERE key = ? AND scope = ? AND account_id = ? AND version = ?
            "#,
        )
        .bind(&value_json)
        .bind(setting.data_type.as_str())
        .bind(&setting.category)
        .bind(&setting.description)
        .bind(setting.is_secret as i64)
        .bind(&setting.updated_by)
        .bind(Self::timestamp_to_millis(&now))
        .bind(&setting.key)
        .bind(setting.scope.as_str())
        .bind(&account)
        .bind(setting.version)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if result.rows_affected() == 0 {
            let current: Option<(i64,)> = sqlx::query_as(
                "SELECT version FROM settings WHERE key = ? AND scope = ? AND account_id = ?",
            )
            .bind(&setting.key)
            .bind(setting.scope.as_str())
            .bind(&account)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

            return match current {
                Some((version,)) => Err(StorageError::VersionConflict { current: version }),
                None => Err(StorageError::NotFound(format!("setting {}", setting.key))),
            };
        }

        setting.version += 1;
        setting.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    // ========================================================================
    // Metric operations
    // ========================================================================

    #[instrument(skip(self, record), fields(node_id = %record.node_id))]
    async fn insert_metrics(&self, mut record: MetricsRecord) -> StorageResult<()> {
        record.normalize(Utc::now());

        let ts = Self::timestamp_to_millis(&record.bucket_start);
        let created_at = record
            .created_at
            .map(|t| Self::timestamp_to_millis(&t))
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        sqlx::query(
            r#"
            INSERT INTO node_metrics_raw (
                account_id, node_id, ts,
                requests_total, requests_success, requests_failed,
                response_time_sum_ms, response_time_count, bytes_total,
                input_tokens_total, output_tokens_total,
                first_byte_time_sum_ms, stream_duration_sum_ms, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.account_id)
        .bind(&record.node_id)
        .bind(ts)
        .bind(record.requests_total)
        .bind(record.requests_success)
        .bind(record.requests_failed)
        .bind(record.response_time_sum_ms)
        .bind(record.response_time_count)
        .bind(record.bytes_total)
        .bind(record.input_tokens_total)
        .bind(record.output_tokens_total)
        .bind(record.first_byte_time_sum_ms)
        .bind(record.stream_duration_sum_ms)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %query.account_id))]
    async fn query_metrics(&self, query: MetricsQuery) -> StorageResult<Vec<MetricsRecord>> {
        let granularity = query.granularity.unwrap_or(Granularity::Raw);
        let table = granularity.table();
        let time_col = granularity.time_column();

        let to = match query.to {
            Some(t) if t.timestamp_millis() != 0 => t,
            _ => Utc::now(),
        };
        let from = query
            .from
            .unwrap_or_else(|| granularity.default_query_start(to));

        let offset = query.offset.unwrap_or(0).max(0);
        let limit = query.limit.or(if offset > 0 {
            Some(PAGED_QUERY_DEFAULT_LIMIT)
        } else {
            None
        });

        let is_raw = granularity == Granularity::Raw;
        let created_col = if is_raw { ", created_at" } else { "" };
        let node_clause = if query.node_id.is_some() {
            " AND node_id = ?"
        } else {
            ""
        };
        let limit_clause = if limit.is_some() {
            " LIMIT ? OFFSET ?"
        } else {
            ""
        };

        let sql = format!(
            "SELECT account_id, node_id, {time_col} AS bucket_ms, {COUNTER_COLUMNS}{created_col} \
             FROM {table} \
             WHERE account_id = ? AND {time_col} >= ? AND {time_col} < ?{node_clause} \
             ORDER BY {time_col} ASC{limit_clause}"
        );

        let mut q = sqlx::query(&sql)
            .bind(&query.account_id)
            .bind(Self::timestamp_to_millis(&from))
            .bind(Self::timestamp_to_millis(&to));
        if let Some(ref node_id) = query.node_id {
            q = q.bind(node_id);
        }
        if let Some(limit) = limit {
            q = q.bind(limit.max(1)).bind(offset);
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let results = rows
            .iter()
            .map(|row| Self::metrics_from_row(row, is_raw))
            .collect::<Vec<_>>();

        debug!("query returned {} metric rows", results.len());
        Ok(results)
    }

    #[instrument(skip(self), fields(target = %target, from = %from, to = %to))]
    async fn aggregate_metrics(
        &self,
        account_id: Option<&str>,
        target: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let source = target.rollup_source().ok_or_else(|| {
            StorageError::QueryFailed("raw granularity is not a rollup destination".to_string())
        })?;

        let src_table = source.table();
        let src_time = source.time_column();
        let dst_table = target.table();
        let bucket_expr = Self::bucket_expression(target);
        let account_clause = if account_id.is_some() {
            " AND account_id = ?"
        } else {
            ""
        };

        // Replace-on-conflict keeps the operation idempotent: the summed
        // source window is authoritative for every bucket it covers.
        let sql = format!(
            r#"
            INSERT INTO {dst_table} (account_id, node_id, bucket_start, {COUNTER_COLUMNS})
            SELECT account_id, node_id, {bucket_expr} AS bucket_ms,
                SUM(requests_total), SUM(requests_success), SUM(requests_failed),
                SUM(response_time_sum_ms), SUM(response_time_count), SUM(bytes_total),
                SUM(input_tokens_total), SUM(output_tokens_total),
                SUM(first_byte_time_sum_ms), SUM(stream_duration_sum_ms)
            FROM {src_table}
            WHERE {src_time} >= ? AND {src_time} < ?{account_clause}
            GROUP BY account_id, node_id, bucket_ms
            ON CONFLICT (account_id, node_id, bucket_start) DO UPDATE SET
                requests_total = excluded.requests_total,
                requests_success = excluded.requests_success,
                requests_failed = excluded.requests_failed,
                response_time_sum_ms = excluded.response_time_sum_ms,
                response_time_count = excluded.response_time_count,
                bytes_total = excluded.bytes_total,
                input_tokens_total = excluded.input_tokens_total,
                output_tokens_total = excluded.output_tokens_total,
                first_byte_time_sum_ms = excluded.first_byte_time_sum_ms,
                stream_duration_sum_ms = excluded.stream_duration_sum_ms
            "#
        );

        let mut q = sqlx::query(&sql)
            .bind(Self::timestamp_to_millis(&from))
            .bind(Self::timestamp_to_millis(&to));
        if let Some(account) = account_id {
            q = q.bind(account);
        }

        let result = q
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let written = result.rows_affected();
        debug!("rollup into {} wrote {} buckets", dst_table, written);
        Ok(written)
    }

    #[instrument(skip(self), fields(now = %now))]
    async fn cleanup_metrics(
        &self,
        account_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let mut total_deleted = 0u64;

        for granularity in [
            Granularity::Raw,
            Granularity::Hourly,
            Granularity::Daily,
            Granularity::Monthly,
        ] {
            let Some(retention) = self.retention.for_granularity(granularity) else {
                continue;
            };
            let cutoff = Self::timestamp_to_millis(&(now - retention));
            let account_clause = if account_id.is_some() {
                " AND account_id = ?"
            } else {
                ""
            };
            let sql = format!(
                "DELETE FROM {} WHERE {} < ?{}",
                granularity.table(),
                granularity.time_column(),
                account_clause
            );

            let mut q = sqlx::query(&sql).bind(cutoff);
            if let Some(account) = account_id {
                q = q.bind(account);
            }

            let result = q
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
            total_deleted += result.rows_affected();
        }

        if total_deleted > 0 {
            info!("retention cleanup deleted {} metric rows", total_deleted);
        }
        Ok(total_deleted)
    }

    // ========================================================================
    // Health-check history operations
    // ========================================================================

    #[instrument(skip(self, record), fields(node_id = %record.node_id))]
    async fn insert_health_check(&self, record: HealthCheckRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO node_health_checks
                (account_id, node_id, check_time, success, response_time_ms,
                 error_message, check_method)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.account_id)
        .bind(&record.node_id)
        .bind(Self::timestamp_to_millis(&record.check_time))
        .bind(record.success as i64)
        .bind(record.response_time_ms)
        .bind(&record.error_message)
        .bind(&record.check_method)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self), fields(node_id = %query.node_id))]
    async fn query_health_checks(
        &self,
        query: HealthCheckQuery,
    ) -> StorageResult<Vec<HealthCheckRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, node_id, check_time, success, response_time_ms,
                   error_message, check_method
            FROM node_health_checks
            WHERE account_id = ? AND node_id = ? AND check_time >= ? AND check_time < ?
            ORDER BY check_time ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(&query.account_id)
        .bind(&query.node_id)
        .bind(Self::timestamp_to_millis(&query.from))
        .bind(Self::timestamp_to_millis(&query.to))
        .bind(query.limit.max(1))
        .bind(query.offset.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let checks = rows
            .into_iter()
            .map(|row| HealthCheckRecord {
                account_id: row.get("account_id"),
                node_id: row.get("node_id"),
                check_time: Self::millis_to_timestamp(row.get("check_time")),
                success: row.get::<i64, _>("success") != 0,
                response_time_ms: row.get("response_time_ms"),
                error_message: row.get("error_message"),
                check_method: row.get("check_method"),
            })
            .collect();

        Ok(checks)
    }

    #[instrument(skip(self), fields(node_id = %query.node_id))]
    async fn count_health_checks(&self, query: &HealthCheckQuery) -> StorageResult<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM node_health_checks
            WHERE account_id = ? AND node_id = ? AND check_time >= ? AND check_time < ?
            "#,
        )
        .bind(&query.account_id)
        .bind(&query.node_id)
        .bind(Self::timestamp_to_millis(&query.from))
        .bind(Self::timestamp_to_millis(&query.to))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.0)
    }

    #[instrument(skip(self))]
    async fn cleanup_health_checks(&self, before: Option<DateTime<Utc>>) -> StorageResult<u64> {
        let cutoff = before.unwrap_or_else(|| Utc::now() - self.retention.health);

        let result = sqlx::query("DELETE FROM node_health_checks WHERE check_time < ?")
            .bind(Self::timestamp_to_millis(&cutoff))
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let deleted = result.rows_affected();
        debug!("deleted {} health checks before {}", deleted, cutoff);
        Ok(deleted)
    }

    // ========================================================================
    // Settings operations
    // ========================================================================

    #[instrument(skip(self))]
    async fn list_settings(&self, filter: SettingsFilter) -> StorageResult<Vec<Setting>> {
        let mut sql = String::from(
            "SELECT key, scope, account_id, value, data_type, category, description, \
             is_secret, version, updated_by, updated_at, created_at FROM settings WHERE 1 = 1",
        );
        if filter.scope.is_some() {
            sql.push_str(" AND scope = ?");
        }
        if filter.category.is_some() {
            sql.push_str(" AND category = ?");
        }
        if filter.account_id.is_some() {
            sql.push_str(" AND account_id = ?");
        }
        sql.push_str(" ORDER BY key ASC");

        let mut q = sqlx::query(&sql);
        if let Some(scope) = filter.scope {
            q = q.bind(scope.as_str());
        }
        if let Some(ref category) = filter.category {
            q = q.bind(category);
        }
        if let Some(ref account) = filter.account_id {
            q = q.bind(account);
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::setting_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn get_setting(
        &self,
        key: &str,
        scope: SettingScope,
        account_id: Option<&str>,
    ) -> StorageResult<Setting> {
        let row = sqlx::query(
            "SELECT key, scope, account_id, value, data_type, category, description, \
             is_secret, version, updated_by, updated_at, created_at \
             FROM settings WHERE key = ? AND scope = ? AND account_id = ?",
        )
        .bind(key)
        .bind(scope.as_str())
        .bind(account_id.unwrap_or(""))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        match row {
            Some(row) => Self::setting_from_row(&row),
            None => Err(StorageError::NotFound(format!("setting {}", key))),
        }
    }

    #[instrument(skip(self, setting), fields(key = %setting.key))]
    async fn upsert_setting(&self, setting: &mut Setting) -> StorageResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let account = setting.account_key().to_string();

        // Version is assigned inside the transaction so concurrent upserts
        // of the same key cannot both claim the same version.
        let current: Option<(i64,)> = sqlx::query_as(
            "SELECT version FROM settings WHERE key = ? AND scope = ? AND account_id = ?",
        )
        .bind(&setting.key)
        .bind(setting.scope.as_str())
        .bind(&account)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let new_version = current.map(|(v,)| v + 1).unwrap_or(1);
        let now = Utc::now();
        let value_json = serde_json::to_string(&setting.value)?;

        sqlx::query(
            r#"
            INSERT INTO settings (
                key, scope, account_id, value, data_type, category, description,
                is_secret, version, updated_by, updated_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (key, scope, account_id) DO UPDATE SET
                value = excluded.value,
                data_type = excluded.data_type,
                category = excluded.category,
                description = excluded.description,
                is_secret = excluded.is_secret,
                version = excluded.version,
                updated_by = excluded.updated_by,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&setting.key)
        .bind(setting.scope.as_str())
        .bind(&account)
        .bind(&value_json)
        .bind(setting.data_type.as_str())
        .bind(&setting.category)
        .bind(&setting.description)
        .bind(setting.is_secret as i64)
        .bind(new_version)
        .bind(&setting.updated_by)
        .bind(Self::timestamp_to_millis(&now))
        .bind(Self::timestamp_to_millis(&now))
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        setting.version = new_version;
        setting.updated_at = now;
        Ok(())
    }

    #[instrument(skip(self, setting), fields(key = %setting.key, version = setting.version))]
    async fn update_setting(&self, setting: &mut Setting) -> StorageResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Self::cas_update_setting(&mut conn, setting).await
    }

    #[instrument(skip(self))]
    async fn delete_setting(
        &self,
        key: &str,
        scope: SettingScope,
        account_id: Option<&str>,
    ) -> StorageResult<()> {
        let result =
            sqlx::query("DELETE FROM settings WHERE key = ? AND scope = ? AND account_id = ?")
                .bind(key)
                .bind(scope.as_str())
                .bind(account_id.unwrap_or(""))
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("setting {}", key)));
        }
        Ok(())
    }

    #[instrument(skip(self, settings), fields(count = settings.len()))]
    async fn batch_update_settings(&self, settings: &mut [Setting]) -> StorageResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        for setting in settings.iter_mut() {
            // Dropping the transaction on error rolls the whole batch back.
            Self::cas_update_setting(&mut *tx, setting).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_global_version(&self) -> StorageResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM settings")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.0)
    }

    // ========================================================================
    // Node lookup
    // ========================================================================

    #[instrument(skip(self))]
    async fn get_node(&self, node_id: &str) -> StorageResult<NodeIdentity> {
        let row = sqlx::query(
            "SELECT id, account_id, disabled, base_url, check_method FROM nodes WHERE id = ?",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        match row {
            Some(row) => Ok(NodeIdentity {
                id: row.get("id"),
                account_id: row.get("account_id"),
                disabled: row.get::<i64, _>("disabled") != 0,
                base_url: row.get("base_url"),
                check_method: row.get("check_method"),
            }),
            None => Err(StorageError::NotFound(format!("node {}", node_id))),
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend at {}", self.db_path);
        self.pool.close().await;
        Ok(())
    }
}
