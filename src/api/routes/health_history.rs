//! Health-check history endpoint

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{
    auth::{authenticate, authorize_node_access},
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::storage::HealthCheckQuery;

/// Default page size for history queries
const DEFAULT_HISTORY_LIMIT: i64 = 300;

/// Hard cap on any page size at the edge
const MAX_PAGE_LIMIT: i64 = 2000;

/// Default lookback when `from` is omitted
const DEFAULT_LOOKBACK_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    from: Option<String>,
    to: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HealthCheckEntry {
    pub check_time: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub check_method: String,
}

#[derive(Debug, Serialize)]
pub struct HealthHistoryResponse {
    pub node_id: String,
    pub from: String,
    pub to: String,
    pub total: i64,
    pub checks: Vec<HealthCheckEntry>,
}

/// Parse an RFC3339 time parameter into UTC.
pub(crate) fn parse_time(name: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ApiError::BadRequest(format!("invalid {name}: expected RFC3339")))
}

/// Validate and normalize shared pagination parameters.
pub(crate) fn validate_paging(
    limit: Option<i64>,
    offset: Option<i64>,
    default_limit: i64,
) -> Result<(i64, i64), ApiError> {
    let limit = limit.unwrap_or(default_limit);
    if limit < 1 {
        return Err(ApiError::BadRequest("limit must be at least 1".to_string()));
    }
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::BadRequest("offset must not be negative".to_string()));
    }
    Ok((limit.min(MAX_PAGE_LIMIT), offset))
}

/// GET /api/nodes/:node_id/health-history
///
/// Probe history for one node, paginated and in chronological order.
pub async fn get_health_history(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HealthHistoryResponse>> {
    let caller = authenticate(&state, &headers).await?;

    let node = state.store.get_node(&node_id).await?;
    authorize_node_access(&caller, &node)?;

    let to = match query.to.as_deref() {
        Some(raw) => parse_time("to", raw)?,
        None => Utc::now(),
    };
    let from = match query.from.as_deref() {
        Some(raw) => parse_time("from", raw)?,
        None => to - Duration::hours(DEFAULT_LOOKBACK_HOURS),
    };
    if from > to {
        return Err(ApiError::BadRequest("from must not be after to".to_string()));
    }

    let (limit, offset) = validate_paging(query.limit, query.offset, DEFAULT_HISTORY_LIMIT)?;

    let history_query = HealthCheckQuery {
        account_id: node.account_id.clone(),
        node_id: node.id.clone(),
        from,
        to,
        limit,
        offset,
    };

    let total = state.store.count_health_checks(&history_query).await?;
    let checks = state
        .store
        .query_health_checks(history_query)
        .await?
        .into_iter()
        .map(|record| HealthCheckEntry {
            check_time: record.check_time.to_rfc3339(),
            success: record.success,
            response_time_ms: record.response_time_ms,
            error_message: record.error_message,
            check_method: record.check_method,
        })
        .collect();

    Ok(Json(HealthHistoryResponse {
        node_id: node.id,
        from: from.to_rfc3339(),
        to: to.to_rfc3339(),
        total,
        checks,
    }))
}
