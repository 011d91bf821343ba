//! HTTP-level tests dispatched in-process against the router

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::{DateTime, Duration, TimeZone, Utc};
use node_monitoring::api::{
    ApiState, Caller, StaticSessionStore, StaticShareTokenStore, build_router,
};
use node_monitoring::hub::HubHandle;
use node_monitoring::settings::SettingsCache;
use node_monitoring::storage::StorageBackend;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::helpers::{create_backend, raw_record, seed_node};

struct TestApi {
    _tmp: tempfile::TempDir,
    db_path: PathBuf,
    store: Arc<dyn StorageBackend>,
    cache: Arc<SettingsCache>,
    router: Router,
}

async fn setup() -> TestApi {
    let (tmp, db_path, store) = create_backend().await;
    let cache = Arc::new(SettingsCache::new(store.clone()).await);

    let sessions = StaticSessionStore::new()
        .with_admin("admin-tok")
        .with_session(
            "user-a",
            Caller {
                account_id: "a1".to_string(),
                is_admin: false,
            },
        )
        .with_session(
            "user-b",
            Caller {
                account_id: "a2".to_string(),
                is_admin: false,
            },
        );
    let share_tokens =
        StaticShareTokenStore::new([("share-1".to_string(), "a1".to_string())].into());

    let state = ApiState::new(
        store.clone(),
        cache.clone(),
        HubHandle::spawn(),
        Arc::new(sessions),
        Arc::new(share_tokens),
    );

    TestApi {
        _tmp: tmp,
        db_path,
        store,
        cache,
        router: build_router(state),
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Settings
// ============================================================================

#[tokio::test]
async fn test_settings_require_admin_session() {
    let api = setup().await;

    let response = api.router.clone().oneshot(get("/api/settings", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = api
        .router
        .clone()
        .oneshot(get("/api/settings", Some("user-a")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = api
        .router
        .clone()
        .oneshot(get("/api/settings", Some("admin-tok")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_put_create_update_and_conflict() {
    let api = setup().await;

    // Create: no version required for an absent key.
    let response = api
        .router
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/settings/rate.limit",
            "admin-tok",
            json!({"value": 100}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["new_version"], json!(1));

    // Update without a version is rejected.
    let response = api
        .router
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/settings/rate.limit",
            "admin-tok",
            json!({"value": 150}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Two clients both read version 1 and race their updates.
    let response = api
        .router
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/settings/rate.limit",
            "admin-tok",
            json!({"value": 150, "version": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["new_version"], json!(2));

    let response = api
        .router
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/settings/rate.limit",
            "admin-tok",
            json!({"value": 175, "version": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("version_conflict"));
    assert_eq!(body["current_version"], json!(2));
}

#[tokio::test]
async fn test_system_put_propagates_into_cache() {
    let api = setup().await;

    api.router
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/settings/poll.interval",
            "admin-tok",
            json!({"value": 45}),
        ))
        .await
        .unwrap();

    assert_eq!(api.cache.get_i64("poll.interval", 0), 45);
}

#[tokio::test]
async fn test_secret_values_are_masked_on_read() {
    let api = setup().await;

    api.router
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/settings/upstream.key",
            "admin-tok",
            json!({"value": "sk-secret", "is_secret": true}),
        ))
        .await
        .unwrap();

    let response = api
        .router
        .clone()
        .oneshot(get("/api/settings/upstream.key", Some("admin-tok")))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"]["value"], json!("******"));

    // The cache kept the real value for in-process consumers.
    assert_eq!(api.cache.get_string("upstream.key", ""), "sk-secret");
}

#[tokio::test]
async fn test_scope_account_coupling_is_validated() {
    let api = setup().await;

    let response = api
        .router
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/settings/per-tenant",
            "admin-tok",
            json!({"value": 1, "scope": "account"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = api
        .router
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/settings/per-tenant",
            "admin-tok",
            json!({"value": 1, "scope": "account", "account_id": "a1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_batch_conflict_returns_409_and_rolls_back() {
    let api = setup().await;

    for key in ["a", "b"] {
        api.router
            .clone()
            .oneshot(send_json(
                "PUT",
                &format!("/api/settings/{key}"),
                "admin-tok",
                json!({"value": 1}),
            ))
            .await
            .unwrap();
    }

    let response = api
        .router
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/settings/batch",
            "admin-tok",
            json!({"settings": [
                {"key": "a", "value": 10, "version": 1},
                {"key": "b", "value": 20, "version": 42}
            ]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = api
        .router
        .clone()
        .oneshot(get("/api/settings/a", Some("admin-tok")))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["data"]["value"], json!(1));
}

#[tokio::test]
async fn test_delete_then_404() {
    let api = setup().await;

    api.router
        .clone()
        .oneshot(send_json(
            "PUT",
            "/api/settings/tmp",
            "admin-tok",
            json!({"value": 1}),
        ))
        .await
        .unwrap();

    let response = api
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/settings/tmp")
                .header(header::AUTHORIZATION, "Bearer admin-tok")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["deleted"], json!("tmp"));

    let response = api
        .router
        .clone()
        .oneshot(get("/api/settings/tmp", Some("admin-tok")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_version_endpoint_carries_beijing_companion() {
    let api = setup().await;

    let response = api
        .router
        .clone()
        .oneshot(get("/api/settings/version", Some("admin-tok")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["version"], json!(0));

    // The companion field is exactly the canonical UTC instant shifted
    // eight hours, rendered in the display pattern.
    let checked_at: DateTime<Utc> = body["checked_at"]
        .as_str()
        .unwrap()
        .parse::<DateTime<chrono::FixedOffset>>()
        .unwrap()
        .with_timezone(&Utc);
    let expected = (checked_at + Duration::hours(8))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    assert_eq!(body["checked_at_beijing"], json!(expected));
}

// ============================================================================
// Health history and metrics
// ============================================================================

#[tokio::test]
async fn test_health_history_access_control() {
    let api = setup().await;
    seed_node(&api.db_path, "n1", "a1").await;

    let uri = "/api/nodes/n1/health-history";

    let response = api.router.clone().oneshot(get(uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = api.router.clone().oneshot(get(uri, Some("user-b"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = api.router.clone().oneshot(get(uri, Some("user-a"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = api.router.clone().oneshot(get(uri, Some("admin-tok"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = api
        .router
        .clone()
        .oneshot(get("/api/nodes/ghost/health-history", Some("admin-tok")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_history_parameter_validation() {
    let api = setup().await;
    seed_node(&api.db_path, "n1", "a1").await;

    let cases = [
        "/api/nodes/n1/health-history?from=yesterday",
        "/api/nodes/n1/health-history?from=2025-11-25T12:00:00Z&to=2025-11-25T10:00:00Z",
        "/api/nodes/n1/health-history?limit=0",
        "/api/nodes/n1/health-history?offset=-1",
    ];

    for uri in cases {
        let response = api.router.clone().oneshot(get(uri, Some("user-a"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {uri}");
    }
}

#[tokio::test]
async fn test_health_history_pagination_totals() {
    let api = setup().await;
    seed_node(&api.db_path, "n1", "a1").await;

    let base = Utc::now() - Duration::hours(2);
    for i in 0..7 {
        api.store
            .insert_health_check(node_monitoring::storage::HealthCheckRecord {
                account_id: "a1".to_string(),
                node_id: "n1".to_string(),
                check_time: base + Duration::minutes(i),
                success: true,
                response_time_ms: Some(30),
                error_message: None,
                check_method: "api".to_string(),
            })
            .await
            .unwrap();
    }

    let response = api
        .router
        .clone()
        .oneshot(get(
            "/api/nodes/n1/health-history?limit=3&offset=3",
            Some("user-a"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], json!(7));
    assert_eq!(body["checks"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_node_metrics_window_sums() {
    let api = setup().await;
    seed_node(&api.db_path, "n1", "a1").await;

    let t1 = Utc.with_ymd_and_hms(2025, 11, 25, 10, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2025, 11, 25, 10, 30, 0).unwrap();
    api.store.insert_metrics(raw_record("a1", "n1", t1, 5)).await.unwrap();
    api.store.insert_metrics(raw_record("a1", "n1", t2, 7)).await.unwrap();

    let response = api
        .router
        .clone()
        .oneshot(get(
            "/api/nodes/n1/metrics?granularity=raw\
             &from=2025-11-25T10:00:00Z&to=2025-11-25T11:00:00Z",
            Some("user-a"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], json!(2));

    let total: i64 = body["metrics"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["requests_total"].as_i64().unwrap())
        .sum();
    assert_eq!(total, 12);
}

#[tokio::test]
async fn test_node_metrics_rejects_unknown_granularity() {
    let api = setup().await;
    seed_node(&api.db_path, "n1", "a1").await;

    let response = api
        .router
        .clone()
        .oneshot(get(
            "/api/nodes/n1/metrics?granularity=fortnight",
            Some("user-a"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
