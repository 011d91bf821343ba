pub mod api;
pub mod config;
pub mod hub;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod util;

use serde::{Deserialize, Serialize};

/// A single frame pushed to connected dashboard clients.
///
/// `kind` is an opaque short string identifying the event class
/// (e.g. `node_status`, `node_metrics`); the payload shape is owned
/// by the producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    pub account_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

impl WsMessage {
    pub fn new(
        account_id: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            kind: kind.into(),
            payload,
        }
    }
}
