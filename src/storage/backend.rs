//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{Granularity, HealthCheckRecord, MetricsRecord, NodeIdentity, Setting,
    SettingScope};

/// Query parameters for fetching metric rows.
///
/// The time predicate is half-open `[from, to)`. When `from` is omitted
/// the store applies the granularity's default window ending at `to`
/// (or now); a `from > to` window is legal and simply matches nothing.
#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    pub account_id: String,

    /// Restrict to one node; `None` scans the whole tenant.
    pub node_id: Option<String>,

    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,

    /// Source table; `None` reads raw rows.
    pub granularity: Option<Granularity>,

    /// Defaults to 500 when `offset > 0`.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query parameters for health-check history.
#[derive(Debug, Clone)]
pub struct HealthCheckQuery {
    pub account_id: String,
    pub node_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub limit: i64,
    pub offset: i64,
}

/// Filters for listing settings; every field is optional.
#[derive(Debug, Clone, Default)]
pub struct SettingsFilter {
    pub scope: Option<SettingScope>,
    pub category: Option<String>,
    pub account_id: Option<String>,
}

/// Trait for persistent storage backends
///
/// One implementation serves all three stores (metrics, health history,
/// settings) plus the read-only node lookup, because they share a pool
/// and the rollup/cleanup statements span the metric tables.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across
/// async tasks behind an `Arc`.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`; implementations convert
/// backend-specific errors to `StorageError` variants so callers can
/// dispatch on kind.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Metric operations
    // ========================================================================

    /// Insert one raw metric row after ingest normalization.
    ///
    /// No deduplication: callers may submit overlapping windows and the
    /// rollup upsert absorbs the repeats.
    async fn insert_metrics(&self, record: MetricsRecord) -> StorageResult<()>;

    /// Query metric rows ordered ascending by bucket time.
    ///
    /// An empty result is not an error.
    async fn query_metrics(&self, query: MetricsQuery) -> StorageResult<Vec<MetricsRecord>>;

    /// Roll the fixed source granularity up into `target` over `[from, to)`.
    ///
    /// Destination rows are replaced with the re-summed source window, not
    /// incremented, so re-running the same window is idempotent. Returns
    /// the number of destination rows written.
    async fn aggregate_metrics(
        &self,
        account_id: Option<&str>,
        target: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Delete rows past each table's retention horizon as of `now`.
    ///
    /// Returns the total number of rows deleted across tables.
    async fn cleanup_metrics(&self, account_id: Option<&str>, now: DateTime<Utc>)
    -> StorageResult<u64>;

    // ========================================================================
    // Health-check history operations
    // ========================================================================

    /// Append one probe outcome. Rows are never mutated afterwards.
    async fn insert_health_check(&self, record: HealthCheckRecord) -> StorageResult<()>;

    /// Range-scan probe history in chronological order.
    async fn query_health_checks(
        &self,
        query: HealthCheckQuery,
    ) -> StorageResult<Vec<HealthCheckRecord>>;

    /// Total row count for the same range, for pagination.
    async fn count_health_checks(&self, query: &HealthCheckQuery) -> StorageResult<i64>;

    /// Delete probe rows older than `before` (default horizon 30 days).
    async fn cleanup_health_checks(&self, before: Option<DateTime<Utc>>) -> StorageResult<u64>;

    // ========================================================================
    // Settings operations
    // ========================================================================

    /// Filtered scan over the settings table.
    async fn list_settings(&self, filter: SettingsFilter) -> StorageResult<Vec<Setting>>;

    /// Single lookup; `NotFound` if absent.
    async fn get_setting(
        &self,
        key: &str,
        scope: SettingScope,
        account_id: Option<&str>,
    ) -> StorageResult<Setting>;

    /// Create or blind-replace; populates `setting.version` with the
    /// version actually written.
    async fn upsert_setting(&self, setting: &mut Setting) -> StorageResult<()>;

    /// Conditional update: succeeds only when the stored version equals
    /// `setting.version`, then bumps it. `VersionConflict` carries the
    /// current stored version; `NotFound` if the row is gone.
    async fn update_setting(&self, setting: &mut Setting) -> StorageResult<()>;

    /// Delete one entry; `NotFound` if absent.
    async fn delete_setting(
        &self,
        key: &str,
        scope: SettingScope,
        account_id: Option<&str>,
    ) -> StorageResult<()>;

    /// All-or-nothing conditional update of several settings; the first
    /// conflict or missing key aborts the whole batch.
    async fn batch_update_settings(&self, settings: &mut [Setting]) -> StorageResult<()>;

    /// `MAX(version)` across the table, or 0 when empty. Used as a coarse
    /// change cursor by the cache.
    async fn get_global_version(&self) -> StorageResult<i64>;

    // ========================================================================
    // Node lookup (table owned by the proxy core)
    // ========================================================================

    /// Resolve a node's identity for ownership checks; `NotFound` for
    /// unknown ids.
    async fn get_node(&self, node_id: &str) -> StorageResult<NodeIdentity>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
