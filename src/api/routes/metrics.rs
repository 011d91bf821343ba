//! Node metrics endpoint

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::{
    auth::{authenticate, authorize_node_access},
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::storage::{Granularity, MetricsQuery, MetricsRecord};

use super::health_history::{parse_time, validate_paging};

/// Default page size for metric queries
const DEFAULT_METRICS_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct NodeMetricsQuery {
    granularity: Option<String>,
    from: Option<String>,
    to: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct NodeMetricsResponse {
    pub node_id: String,
    pub granularity: Granularity,
    pub from: String,
    pub to: String,
    pub count: usize,
    pub metrics: Vec<MetricsRecord>,
}

/// GET /api/nodes/:node_id/metrics
///
/// Counter rows for one node at the requested granularity.
pub async fn get_node_metrics(
    State(state): State<ApiState>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<NodeMetricsQuery>,
) -> ApiResult<Json<NodeMetricsResponse>> {
    let caller = authenticate(&state, &headers).await?;

    let node = state.store.get_node(&node_id).await?;
    authorize_node_access(&caller, &node)?;

    let granularity = match query.granularity.as_deref() {
        Some(raw) => raw
            .parse::<Granularity>()
            .map_err(ApiError::BadRequest)?,
        None => Granularity::Raw,
    };

    let to = match query.to.as_deref() {
        Some(raw) => parse_time("to", raw)?,
        None => Utc::now(),
    };
    let from = match query.from.as_deref() {
        Some(raw) => parse_time("from", raw)?,
        None => granularity.default_query_start(to),
    };
    if from > to {
        return Err(ApiError::BadRequest("from must not be after to".to_string()));
    }

    let (limit, offset) = validate_paging(query.limit, query.offset, DEFAULT_METRICS_LIMIT)?;

    let metrics = state
        .store
        .query_metrics(MetricsQuery {
            account_id: node.account_id.clone(),
            node_id: Some(node.id.clone()),
            from: Some(from),
            to: Some(to),
            granularity: Some(granularity),
            limit: Some(limit),
            offset: Some(offset),
        })
        .await?;

    Ok(Json(NodeMetricsResponse {
        node_id: node.id,
        granularity,
        from: from.to_rfc3339(),
        to: to.to_rfc3339(),
        count: metrics.len(),
        metrics,
    }))
}
