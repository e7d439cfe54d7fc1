//! Client protocol endpoints.
//!
//! These endpoints are consumed by the desktop client. They do not require
//! authentication; the license key plus bound device fingerprint is the
//! credential.
//!
//! # Endpoints
//!
//! - `POST /api/v1/client/check` - Validate a license and bind on first use
//! - `POST /api/v1/client/debit` - Charge credits for generation work
//! - `POST /api/v1/client/refund` - Return credits for failed work
//! - `POST /api/v1/client/next-key` - Check out an upstream api key
//! - `POST /api/v1/client/release-key` - Return an api key to the pool
//! - `POST /api/v1/client/deactivate-key` - Report an api key as dead
//! - `GET  /api/v1/client/config` - Global client configuration
//! - `GET  /api/v1/client/prices` - Per-model credit prices

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::AmuletError;
use crate::server::store::Store;
use crate::server::validation::{normalize_mac, validate_count, validate_not_empty};

/// Shared application state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
}

/// Error codes for client API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientErrorCode {
    /// License key not found
    NotFound,
    /// License exists but is disabled
    Inactive,
    /// Presented MAC does not match the bound device
    DeviceMismatch,
    /// Balance too low for the requested debit
    InsufficientCredit,
    /// No free api key in the pool
    PoolExhausted,
    /// Count is missing, zero, or negative
    InvalidCount,
    /// Request payload is malformed
    InvalidRequest,
    /// Internal server error
    InternalError,
}

/// Client API error response.
#[derive(Debug, Serialize)]
pub struct ClientError {
    pub success: bool,
    pub error: ClientErrorCode,
    pub message: String,
    /// Current balance, attached to INSUFFICIENT_CREDIT so the client can
    /// show it without a follow-up request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit: Option<i64>,
}

impl ClientError {
    pub fn new(code: ClientErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: code,
            message: message.into(),
            credit: None,
        }
    }

    pub fn with_credit(mut self, credit: i64) -> Self {
        self.credit = Some(credit);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        match self.error {
            ClientErrorCode::NotFound => StatusCode::NOT_FOUND,
            ClientErrorCode::Inactive => StatusCode::FORBIDDEN,
            ClientErrorCode::DeviceMismatch => StatusCode::FORBIDDEN,
            ClientErrorCode::InsufficientCredit => StatusCode::PAYMENT_REQUIRED,
            ClientErrorCode::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ClientErrorCode::InvalidCount => StatusCode::BAD_REQUEST,
            ClientErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ClientErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn internal() -> Self {
        Self::new(ClientErrorCode::InternalError, "Database error")
    }
}

impl IntoResponse for ClientError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl From<AmuletError> for ClientError {
    fn from(err: AmuletError) -> Self {
        let code = match &err {
            AmuletError::NotFound => ClientErrorCode::NotFound,
            AmuletError::Inactive => ClientErrorCode::Inactive,
            AmuletError::DeviceMismatch => ClientErrorCode::DeviceMismatch,
            AmuletError::InsufficientCredit { .. } => ClientErrorCode::InsufficientCredit,
            AmuletError::PoolExhausted => ClientErrorCode::PoolExhausted,
            AmuletError::InvalidInput(_) => ClientErrorCode::InvalidRequest,
            // Storage and config details stay in the server log.
            AmuletError::ConfigError(_) | AmuletError::StorageError(_) => {
                return Self::internal();
            }
        };

        let out = Self::new(code, err.to_string());
        match err {
            AmuletError::InsufficientCredit { credit } => out.with_credit(credit),
            _ => out,
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to validate a license and bind it on first use.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// The human-readable license key (e.g., "AMU-XXXX-XXXX-XXXX")
    pub key: String,
    /// Device MAC fingerprint
    pub mac_id: String,
}

/// Response from a successful check.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub success: bool,
    pub credit: i64,
    pub status: String,
    /// True when this call bound the license to the device
    pub bound: bool,
}

/// Request to debit credits for generation work.
#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    pub key: String,
    pub mac_id: String,
    /// Model identifier; unknown models fall back to a unit price of 1
    pub model: String,
    /// Number of generations to charge for; required and positive
    #[serde(default)]
    pub count: Option<i64>,
}

/// Response from a successful debit.
#[derive(Debug, Serialize)]
pub struct DebitResponse {
    pub success: bool,
    /// Total credits charged
    pub charged: i64,
    /// Balance after the debit
    pub credit: i64,
}

/// Request to refund credits for failed work.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub key: String,
    pub mac_id: String,
    pub model: String,
    #[serde(default)]
    pub count: Option<i64>,
    /// Client-reported failure reason, recorded in the activity log
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response from a successful refund.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub success: bool,
    /// Total credits returned
    pub refunded: i64,
    /// Balance after the refund
    pub credit: i64,
}

/// Response from an api key checkout.
#[derive(Debug, Serialize)]
pub struct NextKeyResponse {
    pub success: bool,
    pub api_key: String,
}

/// Request to return an api key to the pool.
#[derive(Debug, Deserialize)]
pub struct ReleaseKeyRequest {
    pub api_key: String,
}

/// Request to report an api key as dead.
#[derive(Debug, Deserialize)]
pub struct DeactivateKeyRequest {
    pub api_key: String,
}

/// Generic acknowledgement for key pool mutations.
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

/// Global client configuration, as served to clients.
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub latest_version: String,
    pub force_update: bool,
    pub maintenance: bool,
    pub maintenance_message: String,
    pub update_description: String,
    pub update_links: Vec<String>,
}

/// Response mapping every configured model to its unit price.
#[derive(Debug, Serialize)]
pub struct PricesResponse {
    pub prices: BTreeMap<String, i64>,
}

/// Shared precondition for the credential-bearing endpoints: both the key
/// and the normalized MAC must be present.
fn require_credentials(key: &str, mac: &str) -> Result<(), ClientError> {
    validate_not_empty(key, "key")
        .and_then(|_| validate_not_empty(mac, "mac_id"))
        .map_err(|e| AmuletError::InvalidInput(e.to_string()).into())
}

/// `count` is mandatory on debit and refund: absent, zero, and negative all
/// reject the same way.
fn require_count(count: Option<i64>) -> Result<i64, ClientError> {
    let count = count.ok_or_else(|| {
        ClientError::new(ClientErrorCode::InvalidCount, "count is required")
    })?;
    validate_count(count, "count")
        .map_err(|e| ClientError::new(ClientErrorCode::InvalidCount, e.to_string()))?;
    Ok(count)
}

/// Mask an api key for log output, keeping only the last four characters.
fn mask_api_key(api_key: &str) -> String {
    let tail: String = api_key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{tail}")
}

// ============================================================================
// Handlers
// ============================================================================

/// Validate a license and bind it to the device on first use.
///
/// # Behavior
/// - Unknown key returns NOT_FOUND
/// - Disabled license returns INACTIVE
/// - Unbound license binds to the presented MAC (first caller wins)
/// - Bound license must present the matching MAC, else DEVICE_MISMATCH
pub async fn check_handler(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ClientError> {
    let mac = normalize_mac(&req.mac_id);
    require_credentials(&req.key, &mac)?;

    info!("Check request for key={}", req.key);

    let license = state
        .store
        .get_license_by_key(&req.key)
        .await
        .map_err(|e| {
            warn!("Database error: {e}");
            ClientError::internal()
        })?
        .ok_or_else(|| {
            warn!("License not found: {}", req.key);
            AmuletError::NotFound
        })?;

    if !license.is_active() {
        return Err(AmuletError::Inactive.into());
    }

    match &license.mac_id {
        None => {
            let won = state.store.bind_mac(&req.key, &mac).await.map_err(|e| {
                warn!("Database error: {e}");
                ClientError::internal()
            })?;

            if won {
                let _ = state
                    .store
                    .log_activity("license.bind", &format!("key={} mac={mac}", req.key))
                    .await;

                return Ok(Json(CheckResponse {
                    success: true,
                    credit: license.credit,
                    status: license.status,
                    bound: true,
                }));
            }

            // Lost a concurrent first-bind race; re-read and compare.
            let current = state
                .store
                .get_license_by_key(&req.key)
                .await
                .map_err(|e| {
                    warn!("Database error: {e}");
                    ClientError::internal()
                })?
                .ok_or(AmuletError::NotFound)?;

            if current.mac_id.as_deref() == Some(mac.as_str()) {
                Ok(Json(CheckResponse {
                    success: true,
                    credit: current.credit,
                    status: current.status,
                    bound: true,
                }))
            } else {
                Err(AmuletError::DeviceMismatch.into())
            }
        }
        Some(bound) if bound == &mac => {
            if let Err(e) = state.store.touch_last_active(&req.key).await {
                warn!("Failed to update last_active for key={}: {e}", req.key);
            }

            Ok(Json(CheckResponse {
                success: true,
                credit: license.credit,
                status: license.status,
                bound: false,
            }))
        }
        Some(_) => Err(AmuletError::DeviceMismatch.into()),
    }
}

/// Resolve the total cost for a model/count pair.
///
/// Unknown models are charged at the fallback unit price of 1 rather than
/// rejected, so the server does not have to track every client-side model
/// name before it ships.
async fn resolve_cost(state: &AppState, model: &str, count: i64) -> Result<i64, ClientError> {
    let unit = state
        .store
        .price_for_model(model)
        .await
        .map_err(|e| {
            warn!("Database error: {e}");
            ClientError::internal()
        })?
        .unwrap_or(1);

    unit.checked_mul(count).ok_or_else(|| {
        ClientError::new(ClientErrorCode::InvalidCount, "count is out of range")
    })
}

/// Classify a failed conditional debit by re-reading the row.
async fn classify_debit_failure(state: &AppState, key: &str, mac: &str) -> AmuletError {
    let license = match state.store.get_license_by_key(key).await {
        Ok(Some(license)) => license,
        Ok(None) => return AmuletError::NotFound,
        Err(e) => return e,
    };

    if !license.is_active() {
        return AmuletError::Inactive;
    }
    if license.mac_id.as_deref() != Some(mac) {
        // Covers both an unbound license (debit requires a prior check)
        // and a key presented from the wrong device.
        return AmuletError::DeviceMismatch;
    }

    AmuletError::InsufficientCredit {
        credit: license.credit,
    }
}

/// Charge credits for generation work.
///
/// The debit is a single conditional UPDATE: concurrent debits against the
/// same license serialize on the balance guard and the total deducted never
/// exceeds the starting balance.
pub async fn debit_handler(
    State(state): State<AppState>,
    Json(req): Json<DebitRequest>,
) -> Result<Json<DebitResponse>, ClientError> {
    let mac = normalize_mac(&req.mac_id);
    require_credentials(&req.key, &mac)?;
    let count = require_count(req.count)?;

    let cost = resolve_cost(&state, &req.model, count).await?;

    let new_balance = state
        .store
        .debit_credit(&req.key, &mac, cost)
        .await
        .map_err(|e| {
            warn!("Database error: {e}");
            ClientError::internal()
        })?;

    match new_balance {
        Some(credit) => {
            info!(
                "Debited {cost} credits from key={} (model={}, count={count})",
                req.key, req.model
            );
            let _ = state
                .store
                .log_activity(
                    "credit.debit",
                    &format!("key={} model={} count={count} cost={cost}", req.key, req.model),
                )
                .await;

            Ok(Json(DebitResponse {
                success: true,
                charged: cost,
                credit,
            }))
        }
        None => Err(classify_debit_failure(&state, &req.key, &mac).await.into()),
    }
}

/// Return credits for failed generation work.
///
/// Refunds skip the status check: a license disabled between the debit and
/// the failure report may still reconcile its balance.
pub async fn refund_handler(
    State(state): State<AppState>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, ClientError> {
    let mac = normalize_mac(&req.mac_id);
    require_credentials(&req.key, &mac)?;
    let count = require_count(req.count)?;

    let amount = resolve_cost(&state, &req.model, count).await?;

    let new_balance = state
        .store
        .refund_credit(&req.key, &mac, amount)
        .await
        .map_err(|e| {
            warn!("Database error: {e}");
            ClientError::internal()
        })?;

    match new_balance {
        Some(credit) => {
            info!(
                "Refunded {amount} credits to key={} (model={}, count={count})",
                req.key, req.model
            );
            let reason = req.reason.as_deref().unwrap_or("unspecified");
            let _ = state
                .store
                .log_activity(
                    "credit.refund",
                    &format!(
                        "key={} model={} count={count} amount={amount} reason={reason}",
                        req.key, req.model
                    ),
                )
                .await;

            Ok(Json(RefundResponse {
                success: true,
                refunded: amount,
                credit,
            }))
        }
        None => {
            // No row matched key+mac: either the key is unknown or it is
            // bound to a different device.
            let license = state
                .store
                .get_license_by_key(&req.key)
                .await
                .map_err(|e| {
                    warn!("Database error: {e}");
                    ClientError::internal()
                })?;

            match license {
                None => Err(AmuletError::NotFound.into()),
                Some(_) => Err(AmuletError::DeviceMismatch.into()),
            }
        }
    }
}

/// Check out the next free upstream api key.
pub async fn next_key_handler(
    State(state): State<AppState>,
) -> Result<Json<NextKeyResponse>, ClientError> {
    let key = state.store.checkout_api_key().await.map_err(|e| {
        warn!("Database error: {e}");
        ClientError::internal()
    })?;

    match key {
        Some(key) => {
            info!("Checked out api key {}", mask_api_key(&key.api_key));

            Ok(Json(NextKeyResponse {
                success: true,
                api_key: key.api_key,
            }))
        }
        None => {
            warn!("Api key pool exhausted");
            Err(AmuletError::PoolExhausted.into())
        }
    }
}

/// Return an api key to the pool.
///
/// Idempotent: releasing a free or unknown key still acknowledges, so a
/// client retrying after a dropped response cannot wedge the pool.
pub async fn release_key_handler(
    State(state): State<AppState>,
    Json(req): Json<ReleaseKeyRequest>,
) -> Result<Json<AckResponse>, ClientError> {
    let matched = state
        .store
        .release_api_key(&req.api_key)
        .await
        .map_err(|e| {
            warn!("Database error: {e}");
            ClientError::internal()
        })?;

    if matched {
        info!("Released api key {}", mask_api_key(&req.api_key));
    } else {
        warn!("Release for unknown api key {}", mask_api_key(&req.api_key));
    }

    Ok(Json(AckResponse {
        success: true,
        message: "released".to_string(),
    }))
}

/// Report an upstream api key as dead and pull it from rotation.
pub async fn deactivate_key_handler(
    State(state): State<AppState>,
    Json(req): Json<DeactivateKeyRequest>,
) -> Result<Json<AckResponse>, ClientError> {
    let matched = state
        .store
        .deactivate_api_key(&req.api_key)
        .await
        .map_err(|e| {
            warn!("Database error: {e}");
            ClientError::internal()
        })?;

    if !matched {
        return Err(AmuletError::NotFound.into());
    }

    warn!("Deactivated api key {}", mask_api_key(&req.api_key));
    let _ = state
        .store
        .log_activity("api_key.deactivate", &mask_api_key(&req.api_key))
        .await;

    Ok(Json(AckResponse {
        success: true,
        message: "deactivated".to_string(),
    }))
}

/// Serve the global client configuration.
pub async fn get_config_handler(
    State(state): State<AppState>,
) -> Result<Json<ConfigResponse>, ClientError> {
    let cfg = state
        .store
        .get_app_config()
        .await
        .map_err(|e| {
            warn!("Database error: {e}");
            ClientError::internal()
        })?
        .ok_or_else(|| {
            warn!("Config row missing; defaults were not seeded");
            ClientError::internal()
        })?;

    // A corrupt links column degrades to an empty list instead of failing
    // the whole config fetch.
    let update_links: Vec<String> =
        serde_json::from_str(&cfg.update_links).unwrap_or_default();

    Ok(Json(ConfigResponse {
        latest_version: cfg.latest_version,
        force_update: cfg.force_update,
        maintenance: cfg.maintenance,
        maintenance_message: cfg.maintenance_message.unwrap_or_default(),
        update_description: cfg.update_description.unwrap_or_default(),
        update_links,
    }))
}

/// Serve the full per-model price list.
pub async fn get_prices_handler(
    State(state): State<AppState>,
) -> Result<Json<PricesResponse>, ClientError> {
    let prices = state.store.list_prices().await.map_err(|e| {
        warn!("Database error: {e}");
        ClientError::internal()
    })?;

    Ok(Json(PricesResponse {
        prices: prices.into_iter().map(|p| (p.model, p.price)).collect(),
    }))
}
