use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};

#[cfg(feature = "admin-api")]
use axum::routing::{delete, patch, put};

use crate::server::client_api::{
    check_handler, deactivate_key_handler, debit_handler, get_config_handler, get_prices_handler,
    next_key_handler, refund_handler, release_key_handler, AppState,
};
use crate::server::logging::{request_logging_middleware, HealthResponse};

#[cfg(feature = "admin-api")]
use crate::server::admin::{
    backup_handler, create_api_key_handler, create_license_handler, delete_api_key_handler,
    delete_license_handler, generate_licenses_handler, get_app_config_handler,
    get_license_handler, import_api_keys_handler, import_licenses_handler, list_api_keys_handler,
    list_licenses_handler, list_logs_handler, list_prices_handler, login_handler,
    unbind_license_handler, update_api_key_handler, update_app_config_handler,
    update_license_handler, update_price_handler, upsert_prices_handler,
};

#[cfg(feature = "admin-api")]
use crate::server::auth::admin_auth_middleware;

/// Liveness probe.
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = state.store.get_app_config().await.is_ok();
    Json(HealthResponse::new(connected))
}

/// Build the main application router for the Amulet server.
///
/// This is a convenience helper so `main.rs` or tests can construct the
/// router in a single call.
///
/// # Routes
///
/// ## Client endpoints (no authentication)
/// - `POST /api/v1/client/check` - Validate a license, bind on first use
/// - `POST /api/v1/client/debit` - Charge credits
/// - `POST /api/v1/client/refund` - Return credits
/// - `POST /api/v1/client/next-key` - Check out an upstream api key
/// - `POST /api/v1/client/release-key` - Return an api key
/// - `POST /api/v1/client/deactivate-key` - Report a dead api key
/// - `GET /api/v1/client/config` - Global client configuration
/// - `GET /api/v1/client/prices` - Per-model prices
///
/// ## Admin endpoints (Basic auth, requires `admin-api` feature)
/// - Everything under `/api/v1/admin` (see `server::admin`)
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/client/check", post(check_handler))
        .route("/api/v1/client/debit", post(debit_handler))
        .route("/api/v1/client/refund", post(refund_handler))
        .route("/api/v1/client/next-key", post(next_key_handler))
        .route("/api/v1/client/release-key", post(release_key_handler))
        .route("/api/v1/client/deactivate-key", post(deactivate_key_handler))
        .route("/api/v1/client/config", get(get_config_handler))
        .route("/api/v1/client/prices", get(get_prices_handler));

    // Add admin API routes if feature is enabled
    #[cfg(feature = "admin-api")]
    let router = {
        let admin = Router::new()
            .route("/login", get(login_handler).post(login_handler))
            .route("/licenses", get(list_licenses_handler))
            .route("/licenses", post(create_license_handler))
            .route("/licenses/generate", post(generate_licenses_handler))
            .route("/licenses/import", post(import_licenses_handler))
            .route("/licenses/:id", get(get_license_handler))
            .route("/licenses/:id", patch(update_license_handler))
            .route("/licenses/:id", delete(delete_license_handler))
            .route("/licenses/:id/unbind", post(unbind_license_handler))
            .route("/keys", get(list_api_keys_handler))
            .route("/keys", post(create_api_key_handler))
            .route("/keys/import", post(import_api_keys_handler))
            .route("/keys/:id", patch(update_api_key_handler))
            .route("/keys/:id", delete(delete_api_key_handler))
            .route(
                "/prices",
                get(list_prices_handler)
                    .post(upsert_prices_handler)
                    .put(upsert_prices_handler),
            )
            .route("/prices/:id", patch(update_price_handler))
            .route(
                "/config",
                get(get_app_config_handler)
                    .post(update_app_config_handler)
                    .put(update_app_config_handler),
            )
            .route("/logs", get(list_logs_handler))
            .route("/backup", get(backup_handler))
            .layer(middleware::from_fn(admin_auth_middleware));

        router.nest("/api/v1/admin", admin)
    };

    router
        .layer(middleware::from_fn(request_logging_middleware))
        .with_state(state)
}
