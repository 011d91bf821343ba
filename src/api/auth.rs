//! Caller identity resolution
//!
//! Session and share-token management belong to the proxy's auth
//! collaborator; the edge only needs two narrow traits to turn a bearer
//! token or cookie into an already-resolved identity. The static
//! implementations below back the standalone binary and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;

use super::error::ApiError;
use super::state::ApiState;
use crate::storage::NodeIdentity;

/// Resolved caller identity.
#[derive(Debug, Clone)]
pub struct Caller {
    pub account_id: String,
    pub is_admin: bool,
}

/// Resolves session tokens to callers.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn resolve_session(&self, token: &str) -> Option<Caller>;
}

/// Resolves long-lived share tokens to the account they expose.
#[async_trait]
pub trait ShareTokenStore: Send + Sync {
    async fn resolve_share_token(&self, token: &str) -> Option<String>;
}

/// Fixed token table; enough for single-operator deployments.
#[derive(Default)]
pub struct StaticSessionStore {
    sessions: HashMap<String, Caller>,
}

impl StaticSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, token: impl Into<String>, caller: Caller) -> Self {
        self.sessions.insert(token.into(), caller);
        self
    }

    pub fn with_admin(self, token: impl Into<String>) -> Self {
        self.with_session(
            token,
            Caller {
                account_id: "admin".to_string(),
                is_admin: true,
            },
        )
    }
}

#[async_trait]
impl SessionStore for StaticSessionStore {
    async fn resolve_session(&self, token: &str) -> Option<Caller> {
        self.sessions.get(token).cloned()
    }
}

/// Fixed share-token -> account table.
#[derive(Default)]
pub struct StaticShareTokenStore {
    tokens: HashMap<String, String>,
}

impl StaticShareTokenStore {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl ShareTokenStore for StaticShareTokenStore {
    async fn resolve_share_token(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// Bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// `session=` value from the Cookie header.
fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    let cookies = headers.get("Cookie").and_then(|v| v.to_str().ok())?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "session").then_some(value)
    })
}

/// Session token from either carrier, bearer header first.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers).or_else(|| session_cookie(headers))
}

/// Resolve the caller for a JSON endpoint.
pub async fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let token = session_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("missing session".to_string()))?;

    state
        .sessions
        .resolve_session(token)
        .await
        .ok_or_else(|| ApiError::Unauthorized("invalid session".to_string()))
}

/// Settings endpoints are operator-only.
pub fn require_admin(caller: &Caller) -> Result<(), ApiError> {
    if caller.is_admin {
        Ok(())
    } else {
        Err(ApiError::Forbidden("admin session required".to_string()))
    }
}

/// A caller may read a node's history iff admin or same account.
pub fn authorize_node_access(caller: &Caller, node: &NodeIdentity) -> Result<(), ApiError> {
    if caller.is_admin || caller.account_id == node.account_id {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "node belongs to another account".to_string(),
        ))
    }
}
