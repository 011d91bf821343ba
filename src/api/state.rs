//! API shared state

use std::sync::Arc;

use crate::hub::HubHandle;
use crate::settings::SettingsCache;
use crate::storage::StorageBackend;

use super::auth::{SessionStore, ShareTokenStore};

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Storage backend for metrics, health history, settings, and node lookup
    pub store: Arc<dyn StorageBackend>,

    /// In-process settings snapshot; edge writes propagate into it
    pub settings_cache: Arc<SettingsCache>,

    /// Broadcast hub for WebSocket clients
    pub hub: HubHandle,

    /// Session resolution (owned by the auth collaborator)
    pub sessions: Arc<dyn SessionStore>,

    /// Share-token resolution for read-only WebSocket access
    pub share_tokens: Arc<dyn ShareTokenStore>,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        settings_cache: Arc<SettingsCache>,
        hub: HubHandle,
        sessions: Arc<dyn SessionStore>,
        share_tokens: Arc<dyn ShareTokenStore>,
    ) -> Self {
        Self {
            store,
            settings_cache,
            hub,
            sessions,
            share_tokens,
        }
    }
}
