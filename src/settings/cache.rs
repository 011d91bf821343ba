//! In-process snapshot of system-scope settings
//!
//! ## Design
//!
//! - **Reads never block on the database**: consumers call the typed
//!   getters against a `HashMap` snapshot guarded by a `std::sync::RwLock`.
//! - **Change callbacks fire outside the lock**: mutation paths collect a
//!   change list under the write lock, release it, then dispatch. A
//!   callback may therefore read the cache again without deadlocking.
//! - **Load failures are tolerated**: a cache that cannot load starts
//!   empty and getters fall back to their defaults.
//!
//! The `version` cursor tracks the highest setting version seen in the
//! snapshot and is used by hosts as a coarse "something changed" marker.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::storage::{Setting, SettingScope, SettingsFilter, StorageBackend, StorageError,
    StorageResult};

/// Observer invoked with the key and the new value (`None` on removal).
pub type ChangeCallback = Arc<dyn Fn(&str, Option<&Value>) + Send + Sync>;

#[derive(Default)]
struct CacheState {
    values: HashMap<String, Value>,
    version: i64,
}

/// Cached view of system-scope settings with change notification.
pub struct SettingsCache {
    store: Arc<dyn StorageBackend>,
    state: RwLock<CacheState>,
    callbacks: RwLock<Vec<ChangeCallback>>,
}

impl SettingsCache {
    /// Build the cache and attempt one synchronous full load.
    ///
    /// A failed load leaves the cache empty; readers get defaults until
    /// the next successful [`refresh`](Self::refresh).
    pub async fn new(store: Arc<dyn StorageBackend>) -> Self {
        let cache = Self {
            store,
            state: RwLock::new(CacheState::default()),
            callbacks: RwLock::new(Vec::new()),
        };

        if let Err(e) = cache.refresh().await {
            warn!("initial settings load failed, starting with empty cache: {}", e);
        }

        cache
    }

    /// Register a change observer. Observers are called at most once per
    /// change event, possibly concurrently for distinct keys.
    pub fn on_change(&self, callback: ChangeCallback) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    /// Reload the system-scope snapshot and notify observers of every key
    /// whose value changed or disappeared.
    pub async fn refresh(&self) -> StorageResult<()> {
        let settings = self
            .store
            .list_settings(SettingsFilter {
                scope: Some(SettingScope::System),
                ..Default::default()
            })
            .await?;

        let mut fresh = HashMap::with_capacity(settings.len());
        let mut max_version = 0i64;
        for setting in settings {
            max_version = max_version.max(setting.version);
            fresh.insert(setting.key, setting.value);
        }

        let mut changes: Vec<(String, Option<Value>)> = Vec::new();
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

            for (key, value) in &fresh {
                if state.values.get(key) != Some(value) {
                    changes.push((key.clone(), Some(value.clone())));
                }
            }
            for key in state.values.keys() {
                if !fresh.contains_key(key) {
                    changes.push((key.clone(), None));
                }
            }

            state.values = fresh;
            state.version = max_version;
        }

        if !changes.is_empty() {
            debug!("settings refresh applied {} changes", changes.len());
        }
        self.dispatch(changes);
        Ok(())
    }

    /// Persist a system-scope value through the store, then update the
    /// local snapshot and notify observers.
    pub async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        let mut setting = match self
            .store
            .get_setting(key, SettingScope::System, None)
            .await
        {
            Ok(mut existing) => {
                existing.value = value.clone();
                existing
            }
            Err(StorageError::NotFound(_)) => Setting::system(key, value.clone()),
            Err(e) => return Err(e),
        };

        self.store.upsert_setting(&mut setting).await?;
        self.apply_local(key, Some(value), setting.version);
        Ok(())
    }

    /// Apply a change another component already persisted. No store write.
    pub fn update_local(&self, key: &str, value: Option<Value>, version: i64) {
        self.apply_local(key, value, version);
    }

    fn apply_local(&self, key: &str, value: Option<Value>, version: i64) {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            match &value {
                Some(v) => {
                    state.values.insert(key.to_string(), v.clone());
                }
                None => {
                    state.values.remove(key);
                }
            }
            state.version = state.version.max(version);
        }
        self.dispatch(vec![(key.to_string(), value)]);
    }

    fn dispatch(&self, changes: Vec<(String, Option<Value>)>) {
        if changes.is_empty() {
            return;
        }
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (key, value) in &changes {
            for callback in &callbacks {
                callback(key, value.as_ref());
            }
        }
    }

    /// Highest setting version seen in the snapshot.
    pub fn version(&self) -> i64 {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .version
    }

    /// Raw value lookup.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values
            .get(key)
            .cloned()
    }

    /// Integer getter tolerating float-shaped JSON numbers.
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => b,
            _ => default,
        }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }
}
