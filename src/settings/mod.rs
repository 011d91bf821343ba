//! Dynamic runtime configuration
//!
//! The persistent side lives in the storage backend; this module holds the
//! in-process snapshot that the rest of the process reads without touching
//! the database.

pub mod cache;

pub use cache::{ChangeCallback, SettingsCache};
