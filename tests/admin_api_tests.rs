//! Integration tests for the admin API endpoints.
//!
//! These tests require the `admin-api` feature (enabled by default).

#![cfg(feature = "admin-api")]

use std::sync::Arc;

use amulet::server::client_api::AppState;
use amulet::server::routes::build_router;
use amulet::server::store::Store;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

/// Basic auth header for the default admin:admin credentials.
const ADMIN_AUTH: &str = "Basic YWRtaW46YWRtaW4=";

async fn setup_state() -> AppState {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory sqlite");

    sqlx::migrate!("migrations/sqlite")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let store = Arc::new(Store::SQLite(pool));
    store.ensure_defaults().await.expect("failed to seed defaults");

    AppState { store }
}

/// Helper to make an authenticated JSON request to the app.
async fn admin_request(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let body_bytes = body
        .map(|v| serde_json::to_vec(&v).unwrap())
        .unwrap_or_default();

    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("Authorization", ADMIN_AUTH)
        .body(Body::from(body_bytes))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));

    (status, body)
}

#[tokio::test]
async fn admin_routes_require_auth() {
    let state = setup_state().await;
    let app = build_router(state);

    // No Authorization header.
    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/admin/licenses")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("WWW-Authenticate"));

    // Wrong credentials ("admin:wrong").
    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/admin/licenses")
        .header("Authorization", "Basic YWRtaW46d3Jvbmc=")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_succeeds_with_valid_credentials() {
    let state = setup_state().await;
    let app = build_router(state);

    let (status, body) = admin_request(app, "POST", "/api/v1/admin/login", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["user"], "admin");
}

#[tokio::test]
async fn create_license_with_explicit_key() {
    let state = setup_state().await;
    let app = build_router(state);

    let (status, body) = admin_request(
        app.clone(),
        "POST",
        "/api/v1/admin/licenses",
        Some(json!({ "key": "AMU-TEST-0001", "credit": 25 })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["key"], "AMU-TEST-0001");
    assert_eq!(body["credit"], 25);
    assert_eq!(body["status"], "active");
    assert!(body["mac_id"].is_null());

    // Duplicate keys are rejected.
    let (status, body) = admin_request(
        app,
        "POST",
        "/api/v1/admin/licenses",
        Some(json!({ "key": "AMU-TEST-0001" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn create_license_generates_key_when_absent() {
    let state = setup_state().await;
    let app = build_router(state);

    let (status, body) = admin_request(
        app,
        "POST",
        "/api/v1/admin/licenses",
        Some(json!({ "credit": 5 })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let key = body["key"].as_str().unwrap();
    assert!(key.starts_with("AMU-"), "unexpected key format: {key}");
}

#[tokio::test]
async fn generate_licenses_creates_requested_count() {
    let state = setup_state().await;
    let app = build_router(state.clone());

    let (status, body) = admin_request(
        app,
        "POST",
        "/api/v1/admin/licenses/generate",
        Some(json!({ "count": 3, "credit": 10 })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], 3);
    let keys = body["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 3);

    for key in keys {
        let license = state
            .store
            .get_license_by_key(key.as_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(license.credit, 10);
    }
}

#[tokio::test]
async fn generate_licenses_rejects_bad_counts() {
    let state = setup_state().await;
    let app = build_router(state);

    for payload in [json!({ "count": 0 }), json!({ "count": 1001 })] {
        let (status, _) = admin_request(
            app.clone(),
            "POST",
            "/api/v1/admin/licenses/generate",
            Some(payload),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn import_licenses_skips_blanks_and_duplicates() {
    let state = setup_state().await;
    state
        .store
        .insert_license("AMU-DUP-0001", None, "active", 0)
        .await
        .unwrap();
    let app = build_router(state);

    let (status, body) = admin_request(
        app,
        "POST",
        "/api/v1/admin/licenses/import",
        Some(json!({
            "keys": "AMU-IMP-0001\n\n  AMU-IMP-0002  \nAMU-DUP-0001\n",
            "credit": 5
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"], 2);
    assert_eq!(body["skipped"], 1);
}

#[tokio::test]
async fn patch_license_updates_fields_and_clears_mac() {
    let state = setup_state().await;
    let created = state
        .store
        .insert_license("AMU-PAT-0001", Some("AA:BB:CC"), "active", 5)
        .await
        .unwrap();
    let app = build_router(state);

    let (status, body) = admin_request(
        app.clone(),
        "PATCH",
        &format!("/api/v1/admin/licenses/{}", created.id),
        Some(json!({ "credit": 50, "status": "inactive" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["credit"], 50);
    assert_eq!(body["status"], "inactive");
    assert_eq!(body["mac_id"], "AA:BB:CC");

    // Empty mac_id clears the binding.
    let (status, body) = admin_request(
        app,
        "PATCH",
        &format!("/api/v1/admin/licenses/{}", created.id),
        Some(json!({ "mac_id": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["mac_id"].is_null());
}

#[tokio::test]
async fn unbind_clears_device_binding() {
    let state = setup_state().await;
    let created = state
        .store
        .insert_license("AMU-UNB-0001", Some("AA:BB:CC"), "active", 5)
        .await
        .unwrap();
    let app = build_router(state);

    let (status, body) = admin_request(
        app,
        "POST",
        &format!("/api/v1/admin/licenses/{}/unbind", created.id),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["mac_id"].is_null());
    assert_eq!(body["credit"], 5);
}

#[tokio::test]
async fn delete_license_then_get_returns_404() {
    let state = setup_state().await;
    let created = state
        .store
        .insert_license("AMU-DEL-0001", None, "active", 0)
        .await
        .unwrap();
    let app = build_router(state);

    let (status, _) = admin_request(
        app.clone(),
        "DELETE",
        &format!("/api/v1/admin/licenses/{}", created.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = admin_request(
        app.clone(),
        "GET",
        &format!("/api/v1/admin/licenses/{}", created.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = admin_request(
        app,
        "DELETE",
        &format!("/api/v1/admin/licenses/{}", created.id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_licenses_paginates() {
    let state = setup_state().await;
    for i in 0..5 {
        state
            .store
            .insert_license(&format!("AMU-PAGE-{i:04}"), None, "active", i)
            .await
            .unwrap();
    }
    let app = build_router(state);

    let (status, body) = admin_request(
        app,
        "GET",
        "/api/v1/admin/licenses?page=2&per_page=2",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 5);
    assert_eq!(body["page"], 2);
    assert_eq!(body["total_pages"], 3);
    assert_eq!(body["licenses"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn api_key_crud_and_import() {
    let state = setup_state().await;
    let app = build_router(state);

    let (status, body) = admin_request(
        app.clone(),
        "POST",
        "/api/v1/admin/keys",
        Some(json!({ "api_key": "sk-upstream-001", "note": "primary" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_i64().unwrap();
    assert_eq!(body["status"], "active");
    assert_eq!(body["in_use"], false);

    // Duplicates conflict.
    let (status, _) = admin_request(
        app.clone(),
        "POST",
        "/api/v1/admin/keys",
        Some(json!({ "api_key": "sk-upstream-001" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Import skips the existing key.
    let (status, body) = admin_request(
        app.clone(),
        "POST",
        "/api/v1/admin/keys/import",
        Some(json!({ "keys": "sk-upstream-001\nsk-upstream-002\n" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"], 1);
    assert_eq!(body["skipped"], 1);

    // Patch can deactivate and force-release.
    let (status, body) = admin_request(
        app.clone(),
        "PATCH",
        &format!("/api/v1/admin/keys/{id}"),
        Some(json!({ "status": "inactive", "in_use": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "inactive");

    let (status, _) = admin_request(
        app.clone(),
        "DELETE",
        &format!("/api/v1/admin/keys/{id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = admin_request(app, "GET", "/api/v1/admin/keys", None).await;
    assert_eq!(status, StatusCode::OK);
    let keys = body.as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["api_key"], "sk-upstream-002");
}

#[tokio::test]
async fn prices_bulk_upsert_and_patch() {
    let state = setup_state().await;
    let app = build_router(state);

    let (status, body) = admin_request(
        app.clone(),
        "PUT",
        "/api/v1/admin/prices",
        Some(json!({
            "prices": [
                { "model": "flux-dev", "price": 4 },
                { "model": "brand-new-model", "price": 7 }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 2);
    assert_eq!(body["skipped"], 0);
    let prices = body["prices"].as_array().unwrap();
    assert!(prices
        .iter()
        .any(|p| p["model"] == "flux-dev" && p["price"] == 4));
    let new_id = prices
        .iter()
        .find(|p| p["model"] == "brand-new-model")
        .and_then(|p| p["id"].as_i64())
        .unwrap();

    let (status, body) = admin_request(
        app.clone(),
        "PATCH",
        &format!("/api/v1/admin/prices/{new_id}"),
        Some(json!({ "price": 9 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["model"] == "brand-new-model" && p["price"] == 9));

    // Invalid entries are skipped, not fatal to the batch.
    let (status, body) = admin_request(
        app,
        "PUT",
        "/api/v1/admin/prices",
        Some(json!({
            "prices": [
                { "model": "x", "price": -1 },
                { "model": "", "price": 2 },
                { "model": "y", "price": 2 }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], 1);
    assert_eq!(body["skipped"], 2);
}

#[tokio::test]
async fn config_roundtrip() {
    let state = setup_state().await;
    let app = build_router(state);

    let (status, body) = admin_request(app.clone(), "GET", "/api/v1/admin/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["latest_version"], "2.3.3");

    let (status, body) = admin_request(
        app.clone(),
        "PUT",
        "/api/v1/admin/config",
        Some(json!({
            "latest_version": "2.4.0",
            "maintenance": true,
            "maintenance_message": "back soon",
            "update_links": ["https://example.com/v2.4.0"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["latest_version"], "2.4.0");
    assert_eq!(body["maintenance"], true);

    // The client-facing endpoint reflects the change.
    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/client/config")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let client_cfg: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(client_cfg["latest_version"], "2.4.0");
    assert_eq!(client_cfg["maintenance_message"], "back soon");
    assert_eq!(
        client_cfg["update_links"],
        json!(["https://example.com/v2.4.0"])
    );
}

#[tokio::test]
async fn logs_endpoint_returns_recent_entries() {
    let state = setup_state().await;
    state.store.log_activity("test.action", "details").await.unwrap();
    let app = build_router(state);

    let (status, body) = admin_request(app, "GET", "/api/v1/admin/logs?limit=10", None).await;

    assert_eq!(status, StatusCode::OK);
    let logs = body["logs"].as_array().unwrap();
    assert!(logs.iter().any(|l| l["action"] == "test.action"));
}

#[tokio::test]
async fn backup_exports_all_tables() {
    let state = setup_state().await;
    state
        .store
        .insert_license("AMU-BAK-0001", None, "active", 1)
        .await
        .unwrap();
    state.store.insert_api_key("K1", "active", None).await.unwrap();
    let app = build_router(state);

    let (status, body) = admin_request(app, "GET", "/api/v1/admin/backup", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["licenses"].as_array().unwrap().len(), 1);
    assert_eq!(body["api_keys"].as_array().unwrap().len(), 1);
    assert!(!body["prices"].as_array().unwrap().is_empty());
    assert_eq!(body["config"]["latest_version"], "2.3.3");
    assert!(body["activity_log"].is_array());
}
