//! Row definitions for the monitoring tables
//!
//! ## Design
//!
//! Metric counters are stored as typed integer columns, one row per
//! `(account_id, node_id, bucket_start)` at each granularity. Coarser
//! tables are derived from finer ones by summing counters inside the
//! destination bucket, so every column here must stay additive.
//!
//! All timestamps are UTC; the database stores Unix milliseconds.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::util;

/// Canonical tenant used when an ingest arrives without an account.
pub const DEFAULT_ACCOUNT: &str = "default";

/// Time bucket size of a metrics row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// Per-ingest rows, no bucketing
    Raw,
    Hourly,
    Daily,
    Monthly,
}

impl Granularity {
    /// Table backing this granularity.
    pub fn table(&self) -> &'static str {
        match self {
            Granularity::Raw => "node_metrics_raw",
            Granularity::Hourly => "node_metrics_hourly",
            Granularity::Daily => "node_metrics_daily",
            Granularity::Monthly => "node_metrics_monthly",
        }
    }

    /// Time column of the backing table.
    pub fn time_column(&self) -> &'static str {
        match self {
            Granularity::Raw => "ts",
            _ => "bucket_start",
        }
    }

    /// Default query start applied when the caller omits `from`: a window
    /// ending at `to` of 24 h, 7 d, 30 d, or twelve calendar months. The
    /// monthly window is calendar arithmetic, not a day count, so it
    /// stays exact across leap years and 31-day months.
    pub fn default_query_start(&self, to: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Raw => to - Duration::hours(24),
            Granularity::Hourly => to - Duration::days(7),
            Granularity::Daily => to - Duration::days(30),
            Granularity::Monthly => util::months_back(to, 12),
        }
    }

    /// Bucket a source timestamp into this granularity's bucket start.
    pub fn bucket_start(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Raw => t,
            Granularity::Hourly => util::truncate_to_hour(t),
            Granularity::Daily => util::truncate_to_day(t),
            Granularity::Monthly => util::truncate_to_month(t),
        }
    }

    /// Source granularity feeding this one during rollup.
    pub fn rollup_source(&self) -> Option<Granularity> {
        match self {
            Granularity::Raw => None,
            Granularity::Hourly => Some(Granularity::Raw),
            Granularity::Daily => Some(Granularity::Hourly),
            Granularity::Monthly => Some(Granularity::Daily),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Granularity::Raw => write!(f, "raw"),
            Granularity::Hourly => write!(f, "hourly"),
            Granularity::Daily => write!(f, "daily"),
            Granularity::Monthly => write!(f, "monthly"),
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    /// Accepts the API spellings (`hour`, `day`, `month`) as well as the
    /// storage names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Granularity::Raw),
            "hour" | "hourly" => Ok(Granularity::Hourly),
            "day" | "daily" => Ok(Granularity::Daily),
            "month" | "monthly" => Ok(Granularity::Monthly),
            other => Err(format!("unknown granularity: {other}")),
        }
    }
}

/// How long rows of each metric tier and the health history are kept.
///
/// Monthly rows are kept indefinitely and are not configurable. Defaults
/// match the standard deployment; operators override per table through
/// the config surface.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub raw: Duration,
    pub hourly: Duration,
    pub daily: Duration,
    pub health: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            raw: Duration::days(7),
            hourly: Duration::days(30),
            daily: Duration::days(365),
            health: Duration::days(30),
        }
    }
}

impl RetentionPolicy {
    /// Retention horizon for a metric tier; `None` means rows are kept
    /// indefinitely.
    pub fn for_granularity(&self, granularity: Granularity) -> Option<Duration> {
        match granularity {
            Granularity::Raw => Some(self.raw),
            Granularity::Hourly => Some(self.hourly),
            Granularity::Daily => Some(self.daily),
            Granularity::Monthly => None,
        }
    }
}

/// One time-bucketed counter row.
///
/// For raw rows `bucket_start` is the ingest timestamp; for aggregated
/// rows it is the UTC start of the bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub account_id: String,
    pub node_id: String,
    pub bucket_start: DateTime<Utc>,
    pub requests_total: i64,
    pub requests_success: i64,
    pub requests_failed: i64,
    pub response_time_sum_ms: i64,
    pub response_time_count: i64,
    pub bytes_total: i64,
    pub input_tokens_total: i64,
    pub output_tokens_total: i64,
    pub first_byte_time_sum_ms: i64,
    pub stream_duration_sum_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MetricsRecord {
    /// Normalize an ingest before it hits the raw table.
    ///
    /// Guarantees `requests_total >= requests_success + requests_failed`
    /// afterwards. Missing counters are derived where the submitted ones
    /// allow it; callers may legitimately report only totals.
    pub fn normalize(&mut self, now: DateTime<Utc>) {
        if self.account_id.is_empty() {
            self.account_id = DEFAULT_ACCOUNT.to_string();
        }
        if self.bucket_start.timestamp_millis() == 0 {
            self.bucket_start = now;
        }
        if self.requests_total == 0 {
            self.requests_total = self.requests_success + self.requests_failed;
        }
        if self.requests_success == 0 && self.requests_total > 0 {
            self.requests_success = self.requests_total - self.requests_failed;
        }
        if self.response_time_count == 0 && self.requests_total > 0 {
            self.response_time_count = self.requests_total;
        }
    }
}

/// Outcome of one health probe of one node. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub account_id: String,
    pub node_id: String,
    pub check_time: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub check_method: String,
}

/// Visibility scope of a configuration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingScope {
    System,
    Account,
    User,
}

impl SettingScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingScope::System => "system",
            SettingScope::Account => "account",
            SettingScope::User => "user",
        }
    }
}

impl std::str::FromStr for SettingScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(SettingScope::System),
            "account" => Ok(SettingScope::Account),
            "user" => Ok(SettingScope::User),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// Declared shape of a setting value. Advisory; the value itself is JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingDataType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Duration,
}

impl SettingDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingDataType::String => "string",
            SettingDataType::Number => "number",
            SettingDataType::Boolean => "boolean",
            SettingDataType::Object => "object",
            SettingDataType::Array => "array",
            SettingDataType::Duration => "duration",
        }
    }

    /// Infer a declared type from a JSON value.
    pub fn infer(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(_) => SettingDataType::String,
            serde_json::Value::Number(_) => SettingDataType::Number,
            serde_json::Value::Bool(_) => SettingDataType::Boolean,
            serde_json::Value::Array(_) => SettingDataType::Array,
            _ => SettingDataType::Object,
        }
    }
}

impl std::str::FromStr for SettingDataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(SettingDataType::String),
            "number" => Ok(SettingDataType::Number),
            "boolean" => Ok(SettingDataType::Boolean),
            "object" => Ok(SettingDataType::Object),
            "array" => Ok(SettingDataType::Array),
            "duration" => Ok(SettingDataType::Duration),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

/// Replacement value exposed for secret settings.
pub const SECRET_MASK: &str = "******";

/// A versioned configuration entry keyed by `(key, scope, account_id)`.
///
/// `version` starts at 1 and is bumped by every write; conditional
/// updates CAS on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub scope: SettingScope,
    /// Absent for system scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub value: serde_json::Value,
    pub data_type: SettingDataType,
    pub category: String,
    pub description: String,
    pub is_secret: bool,
    pub version: i64,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Setting {
    /// System-scope entry with defaults filled in.
    pub fn system(key: impl Into<String>, value: serde_json::Value) -> Self {
        let now = Utc::now();
        let data_type = SettingDataType::infer(&value);
        Self {
            key: key.into(),
            scope: SettingScope::System,
            account_id: None,
            value,
            data_type,
            category: String::new(),
            description: String::new(),
            is_secret: false,
            version: 0,
            updated_by: String::new(),
            updated_at: now,
            created_at: now,
        }
    }

    /// Storage key for the account column; system scope collapses to "".
    pub fn account_key(&self) -> &str {
        self.account_id.as_deref().unwrap_or("")
    }

    /// Copy for the wire with secret values masked.
    ///
    /// Applied at the serialization boundary only; in-process consumers
    /// (the cache) keep the real value.
    pub fn redacted(&self) -> Setting {
        let mut out = self.clone();
        if out.is_secret {
            out.value = serde_json::Value::String(SECRET_MASK.to_string());
        }
        out
    }
}

/// Node row as owned by the proxy core. Read-only here: the monitoring
/// core only needs ownership and probe method for access checks and
/// history responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub id: String,
    pub account_id: String,
    pub disabled: bool,
    pub base_url: String,
    pub check_method: String,
}
