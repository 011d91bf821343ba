//! Storage backends for the monitoring tables
//!
//! This module provides a trait-based abstraction over the SQL backend
//! holding metric rollups, health-check history, and versioned settings.
//!
//! ## Design
//!
//! - **Trait-based**: `StorageBackend` allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio tasks
//! - **Upsert-oriented**: rollup and settings writes lean on the database's
//!   `INSERT .. ON CONFLICT DO UPDATE` so concurrent writers never need
//!   cross-transaction coordination

pub mod backend;
pub mod error;
pub mod schema;
pub mod sqlite;

pub use backend::{HealthCheckQuery, MetricsQuery, SettingsFilter, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use schema::{
    Granularity, HealthCheckRecord, MetricsRecord, NodeIdentity, RetentionPolicy, Setting,
    SettingDataType, SettingScope,
};
