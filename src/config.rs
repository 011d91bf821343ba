use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::SchedulerConfig;
use crate::storage::RetentionPolicy;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
    // Future: PostgreSQL, MySQL
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitoring.db")
}

/// Scheduler cadence configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between aggregation ticks (ticks align to multiples)
    #[serde(default = "default_aggregate_interval_secs")]
    pub aggregate_interval_secs: u64,

    /// Seconds between retention cleanup ticks
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            aggregate_interval_secs: default_aggregate_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl SchedulerSettings {
    /// Validate scheduler configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.aggregate_interval_secs < 60 {
            return Err("aggregate_interval_secs must be at least 60".to_string());
        }
        if self.aggregate_interval_secs > 86_400 {
            return Err("aggregate_interval_secs cannot exceed 86400 (1 day)".to_string());
        }
        if self.cleanup_interval_secs < 300 {
            return Err("cleanup_interval_secs must be at least 300".to_string());
        }
        if self.cleanup_interval_secs > 7 * 86_400 {
            return Err("cleanup_interval_secs cannot exceed 604800 (7 days)".to_string());
        }

        if self.cleanup_interval_secs < self.aggregate_interval_secs {
            tracing::warn!(
                "cleanup_interval_secs ({}) is shorter than aggregate_interval_secs ({}); \
                 cleanup will run against partially aggregated windows",
                self.cleanup_interval_secs,
                self.aggregate_interval_secs
            );
        }

        Ok(())
    }

    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            aggregate_interval: Duration::from_secs(self.aggregate_interval_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
        }
    }
}

fn default_aggregate_interval_secs() -> u64 {
    3600
}

fn default_cleanup_interval_secs() -> u64 {
    86_400
}

/// Per-table retention overrides, in days
///
/// Monthly rollups are kept indefinitely and have no override.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RetentionSettings {
    /// Days to keep raw ingest rows
    #[serde(default = "default_raw_retention_days")]
    pub raw_days: u32,

    /// Days to keep hourly rollup rows
    #[serde(default = "default_hourly_retention_days")]
    pub hourly_days: u32,

    /// Days to keep daily rollup rows
    #[serde(default = "default_daily_retention_days")]
    pub daily_days: u32,

    /// Days to keep health-check history
    #[serde(default = "default_health_retention_days")]
    pub health_days: u32,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            raw_days: default_raw_retention_days(),
            hourly_days: default_hourly_retention_days(),
            daily_days: default_daily_retention_days(),
            health_days: default_health_retention_days(),
        }
    }
}

impl RetentionSettings {
    /// Validate retention configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        for (name, days) in [
            ("raw_days", self.raw_days),
            ("hourly_days", self.hourly_days),
            ("daily_days", self.daily_days),
            ("health_days", self.health_days),
        ] {
            if days < 1 {
                return Err(format!("{name} must be at least 1"));
            }
            if days > 3650 {
                return Err(format!("{name} cannot exceed 3650 (10 years)"));
            }
        }

        if self.hourly_days < self.raw_days || self.daily_days < self.hourly_days {
            tracing::warn!(
                "retention tiers are inverted (raw {} > hourly {} or hourly {} > daily {}); \
                 coarser rollups will expire before the rows they summarize",
                self.raw_days,
                self.hourly_days,
                self.hourly_days,
                self.daily_days
            );
        }

        Ok(())
    }

    pub fn to_retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            raw: chrono::Duration::days(self.raw_days as i64),
            hourly: chrono::Duration::days(self.hourly_days as i64),
            daily: chrono::Duration::days(self.daily_days as i64),
            health: chrono::Duration::days(self.health_days as i64),
        }
    }
}

fn default_raw_retention_days() -> u32 {
    7
}

fn default_hourly_retention_days() -> u32 {
    30
}

fn default_daily_retention_days() -> u32 {
    365
}

fn default_health_retention_days() -> u32 {
    30
}

/// API server configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Bearer token granting an admin session. The session collaborator
    /// normally supplies richer identities; this is the standalone surface.
    pub admin_token: Option<String>,

    /// Share token -> account map for read-only WebSocket access.
    #[serde(default)]
    pub share_tokens: HashMap<String, String>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

/// Settings cache configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CacheSettings {
    /// Seconds between cache refreshes
    #[serde(default = "default_cache_refresh_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_cache_refresh_secs(),
        }
    }
}

fn default_cache_refresh_secs() -> u64 {
    300
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to local SQLite)
    pub storage: Option<StorageConfig>,

    /// Scheduler cadence (optional - defaults to hourly/daily)
    pub scheduler: Option<SchedulerSettings>,

    /// Per-table retention overrides (optional - defaults to 7/30/365 days)
    pub retention: Option<RetentionSettings>,

    /// API server configuration (optional - API disabled if not specified)
    pub api: Option<ApiSettings>,

    /// Settings cache refresh (optional)
    pub cache: Option<CacheSettings>,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ref scheduler) = self.scheduler {
            scheduler.validate()?;
        }
        if let Some(ref retention) = self.retention {
            retention.validate()?;
        }
        if let Some(ref api) = self.api
            && api.bind.parse::<std::net::IpAddr>().is_err()
        {
            return Err(format!("invalid api bind address: {}", api.bind));
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_applies_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.storage.is_none());
        assert!(config.api.is_none());
        assert!(config.validate().is_ok());

        let scheduler = config.scheduler.unwrap_or_default();
        assert_eq!(scheduler.aggregate_interval_secs, 3600);
        assert_eq!(scheduler.cleanup_interval_secs, 86_400);

        let retention = config.retention.unwrap_or_default();
        assert_eq!(retention.raw_days, 7);
        assert_eq!(retention.hourly_days, 30);
        assert_eq!(retention.daily_days, 365);
        assert_eq!(retention.health_days, 30);
    }

    #[test]
    fn test_full_config_parses() {
        let raw = r#"
        {
            "storage": { "backend": "sqlite", "path": "/tmp/m.db" },
            "scheduler": { "aggregate_interval_secs": 1800 },
            "retention": { "raw_days": 3, "health_days": 14 },
            "api": {
                "bind": "0.0.0.0",
                "port": 9090,
                "admin_token": "secret",
                "share_tokens": { "tok-1": "a1" }
            },
            "cache": { "refresh_interval_secs": 60 }
        }
        "#;
        let config: Config = serde_json::from_str(raw).unwrap();
        config.validate().unwrap();

        let api = config.api.unwrap();
        assert_eq!(api.port, 9090);
        assert!(api.enable_cors);
        assert_eq!(api.share_tokens.get("tok-1").map(String::as_str), Some("a1"));

        let scheduler = config.scheduler.unwrap();
        assert_eq!(scheduler.aggregate_interval_secs, 1800);
        assert_eq!(scheduler.cleanup_interval_secs, 86_400);

        // Unset retention fields keep their defaults.
        let retention = config.retention.unwrap();
        assert_eq!(retention.raw_days, 3);
        assert_eq!(retention.hourly_days, 30);
        assert_eq!(retention.health_days, 14);

        let policy = retention.to_retention_policy();
        assert_eq!(policy.raw, chrono::Duration::days(3));
        assert_eq!(policy.health, chrono::Duration::days(14));
    }

    #[test]
    fn test_out_of_range_interval_is_rejected() {
        let raw = r#"{ "scheduler": { "aggregate_interval_secs": 5 } }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_retention_is_rejected() {
        let raw = r#"{ "retention": { "raw_days": 0 } }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());

        let raw = r#"{ "retention": { "daily_days": 4000 } }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_bind_address_is_rejected() {
        let raw = r#"{ "api": { "bind": "not-an-ip" } }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
