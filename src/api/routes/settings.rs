//! Settings endpoints (operator-only)
//!
//! Writes go through the store's version CAS; a stale `version` comes
//! back as 409 with the current version so the client can refresh and
//! retry. Successful system-scope writes are pushed into the settings
//! cache so in-process readers do not wait for the next refresh.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{
    auth::{authenticate, require_admin},
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::storage::{Setting, SettingScope, SettingsFilter, StorageError};
use crate::util;

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    scope: Option<String>,
    category: Option<String>,
    account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettingWriteRequest {
    pub value: Value,
    pub scope: Option<String>,
    pub account_id: Option<String>,
    pub data_type: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub is_secret: Option<bool>,
    pub version: Option<i64>,
    pub updated_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchWriteRequest {
    pub settings: Vec<BatchEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BatchEntry {
    pub key: String,
    #[serde(flatten)]
    pub write: SettingWriteRequest,
}

#[derive(Debug, Serialize)]
pub struct SettingsListResponse {
    pub data: Vec<Setting>,
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct SettingResponse {
    pub data: Setting,
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub success: bool,
    pub new_version: i64,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub version: i64,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: String,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: i64,
    pub checked_at: String,
    /// Redundant operator-convenience rendering; `checked_at` stays
    /// canonical UTC.
    pub checked_at_beijing: String,
}

/// Scope/account coupling is enforced here, not in the store.
fn resolve_scope(
    scope: Option<&str>,
    account_id: Option<&String>,
) -> Result<(SettingScope, Option<String>), ApiError> {
    let scope = match scope {
        Some(raw) => raw.parse::<SettingScope>().map_err(ApiError::BadRequest)?,
        None => SettingScope::System,
    };

    match scope {
        SettingScope::System if account_id.is_some() => Err(ApiError::BadRequest(
            "system scope does not take an account_id".to_string(),
        )),
        SettingScope::Account | SettingScope::User if account_id.is_none() => Err(
            ApiError::BadRequest(format!("{} scope requires an account_id", scope.as_str())),
        ),
        _ => Ok((scope, account_id.cloned())),
    }
}

/// Merge a write request over an existing row (or a fresh default row).
fn merged_setting(
    key: &str,
    scope: SettingScope,
    account_id: Option<String>,
    existing: Option<Setting>,
    write: &SettingWriteRequest,
) -> Result<Setting, ApiError> {
    let mut setting = existing.unwrap_or_else(|| {
        let mut fresh = Setting::system(key, Value::Null);
        fresh.scope = scope;
        fresh.account_id = account_id.clone();
        fresh.created_at = Utc::now();
        fresh
    });

    setting.value = write.value.clone();
    if let Some(ref raw) = write.data_type {
        setting.data_type = raw.parse().map_err(ApiError::BadRequest)?;
    } else if setting.version == 0 {
        setting.data_type = crate::storage::SettingDataType::infer(&write.value);
    }
    if let Some(ref category) = write.category {
        setting.category = category.clone();
    }
    if let Some(ref description) = write.description {
        setting.description = description.clone();
    }
    if let Some(is_secret) = write.is_secret {
        setting.is_secret = is_secret;
    }
    if let Some(ref updated_by) = write.updated_by {
        setting.updated_by = updated_by.clone();
    }

    Ok(setting)
}

fn propagate_to_cache(state: &ApiState, setting: &Setting) {
    if setting.scope == SettingScope::System {
        state
            .settings_cache
            .update_local(&setting.key, Some(setting.value.clone()), setting.version);
    }
}

/// GET /api/settings
pub async fn list_settings(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<Json<SettingsListResponse>> {
    let caller = authenticate(&state, &headers).await?;
    require_admin(&caller)?;

    let scope = query
        .scope
        .as_deref()
        .map(|raw| raw.parse::<SettingScope>().map_err(ApiError::BadRequest))
        .transpose()?;

    let settings = state
        .store
        .list_settings(SettingsFilter {
            scope,
            category: query.category,
            account_id: query.account_id,
        })
        .await?;

    let version = state.store.get_global_version().await?;
    let data = settings.iter().map(Setting::redacted).collect();

    Ok(Json(SettingsListResponse { data, version }))
}

/// GET /api/settings/:key
pub async fn get_setting(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<Json<SettingResponse>> {
    let caller = authenticate(&state, &headers).await?;
    require_admin(&caller)?;

    let (scope, account_id) = resolve_scope(query.scope.as_deref(), query.account_id.as_ref())?;

    let setting = state
        .store
        .get_setting(&key, scope, account_id.as_deref())
        .await?;

    Ok(Json(SettingResponse {
        version: setting.version,
        data: setting.redacted(),
    }))
}

/// PUT /api/settings/:key
///
/// Updating an existing key requires its `version`; a missing key is
/// created without a version check.
pub async fn put_setting(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SettingWriteRequest>,
) -> ApiResult<Json<WriteResponse>> {
    let caller = authenticate(&state, &headers).await?;
    require_admin(&caller)?;

    let (scope, account_id) = resolve_scope(body.scope.as_deref(), body.account_id.as_ref())?;

    let existing = match state
        .store
        .get_setting(&key, scope, account_id.as_deref())
        .await
    {
        Ok(setting) => Some(setting),
        Err(StorageError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    let is_create = existing.is_none();
    let mut setting = match existing {
        Some(existing) => {
            let Some(version) = body.version else {
                return Err(ApiError::BadRequest(
                    "version is required when updating an existing setting".to_string(),
                ));
            };
            let mut merged = merged_setting(&key, scope, account_id, Some(existing), &body)?;
            merged.version = version;
            merged
        }
        None => merged_setting(&key, scope, account_id, None, &body)?,
    };

    if is_create {
        state.store.upsert_setting(&mut setting).await?;
    } else {
        state.store.update_setting(&mut setting).await?;
    }

    propagate_to_cache(&state, &setting);

    Ok(Json(WriteResponse {
        success: true,
        new_version: setting.version,
    }))
}

/// POST /api/settings/batch
///
/// All-or-nothing: the first version conflict or missing key rolls the
/// whole batch back.
pub async fn batch_update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<BatchWriteRequest>,
) -> ApiResult<Json<BatchResponse>> {
    let caller = authenticate(&state, &headers).await?;
    require_admin(&caller)?;

    let mut settings = Vec::with_capacity(body.settings.len());
    for entry in &body.settings {
        let (scope, account_id) =
            resolve_scope(entry.write.scope.as_deref(), entry.write.account_id.as_ref())?;
        let Some(version) = entry.write.version else {
            return Err(ApiError::BadRequest(format!(
                "version is required for batch entry {}",
                entry.key
            )));
        };

        let existing = state
            .store
            .get_setting(&entry.key, scope, account_id.as_deref())
            .await?;
        let mut merged =
            merged_setting(&entry.key, scope, account_id, Some(existing), &entry.write)?;
        merged.version = version;
        settings.push(merged);
    }

    state.store.batch_update_settings(&mut settings).await?;

    for setting in &settings {
        propagate_to_cache(&state, setting);
    }

    let version = state.store.get_global_version().await?;
    Ok(Json(BatchResponse {
        success: true,
        version,
    }))
}

/// DELETE /api/settings/:key
pub async fn delete_setting(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<Json<DeleteResponse>> {
    let caller = authenticate(&state, &headers).await?;
    require_admin(&caller)?;

    let (scope, account_id) = resolve_scope(query.scope.as_deref(), query.account_id.as_ref())?;

    state
        .store
        .delete_setting(&key, scope, account_id.as_deref())
        .await?;

    if scope == SettingScope::System {
        let version = state.settings_cache.version();
        state.settings_cache.update_local(&key, None, version);
    }

    Ok(Json(DeleteResponse { deleted: key }))
}

/// GET /api/settings/version
pub async fn get_version(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<VersionResponse>> {
    let caller = authenticate(&state, &headers).await?;
    require_admin(&caller)?;

    let version = state.store.get_global_version().await?;
    let now = Utc::now();

    Ok(Json(VersionResponse {
        version,
        checked_at: now.to_rfc3339(),
        checked_at_beijing: util::format_beijing(now),
    }))
}
