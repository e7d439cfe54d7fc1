//! Admin API handlers for managing licenses, the api key pool, prices,
//! the client config row, and the audit trail.
//!
//! All endpoints sit behind HTTP Basic authentication (see `server::auth`).
//!
//! # Endpoints
//!
//! - `POST /api/v1/admin/login` - Verify credentials
//! - `GET /api/v1/admin/licenses` - List licenses (filters + pagination)
//! - `POST /api/v1/admin/licenses` - Create a license
//! - `POST /api/v1/admin/licenses/generate` - Batch-generate licenses
//! - `POST /api/v1/admin/licenses/import` - Import line-delimited keys
//! - `GET /api/v1/admin/licenses/{id}` - Get a license
//! - `PATCH /api/v1/admin/licenses/{id}` - Update a license
//! - `DELETE /api/v1/admin/licenses/{id}` - Delete a license
//! - `POST /api/v1/admin/licenses/{id}/unbind` - Clear the device binding
//! - `GET /api/v1/admin/keys` - List api keys
//! - `POST /api/v1/admin/keys` - Add an api key
//! - `POST /api/v1/admin/keys/import` - Import line-delimited api keys
//! - `PATCH /api/v1/admin/keys/{id}` - Update an api key
//! - `DELETE /api/v1/admin/keys/{id}` - Delete an api key
//! - `GET /api/v1/admin/prices` - List prices
//! - `PUT /api/v1/admin/prices` - Bulk-upsert prices
//! - `PATCH /api/v1/admin/prices/{id}` - Update one price
//! - `GET /api/v1/admin/config` - Get the client config row
//! - `PUT /api/v1/admin/config` - Update the client config row
//! - `GET /api/v1/admin/logs` - Recent activity log entries
//! - `GET /api/v1/admin/backup` - Full data export

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::key_generation::generate_license_key_from_config;
use crate::server::client_api::AppState;
use crate::server::store::{ActivityLog, ApiKey, AppConfig, License, LicenseFilter, Price};
use crate::server::validation::normalize_mac;

/// Admin API error type.
#[derive(Debug)]
pub enum AdminError {
    /// Resource not found
    NotFound(String),
    /// Invalid request data
    BadRequest(String),
    /// Request conflicts with existing state (duplicate key, ...)
    Conflict(String),
    /// Database error
    DatabaseError(String),
    /// Configuration error
    ConfigError(String),
}

impl std::fmt::Display for AdminError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminError::NotFound(msg) => write!(f, "not found: {msg}"),
            AdminError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            AdminError::Conflict(msg) => write!(f, "conflict: {msg}"),
            AdminError::DatabaseError(msg) => write!(f, "database error: {msg}"),
            AdminError::ConfigError(msg) => write!(f, "configuration error: {msg}"),
        }
    }
}

impl std::error::Error for AdminError {}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AdminError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AdminError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AdminError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            AdminError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AdminError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

impl From<crate::errors::AmuletError> for AdminError {
    fn from(err: crate::errors::AmuletError) -> Self {
        use crate::errors::AmuletError;
        // The store surfaces only config and storage failures to this layer;
        // protocol-level classification lives in `client_api`.
        match err {
            AmuletError::ConfigError(msg) => AdminError::ConfigError(msg),
            other => AdminError::DatabaseError(other.to_string()),
        }
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response for a successful login probe.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: String,
}

/// Query parameters for listing licenses.
#[derive(Debug, Deserialize)]
pub struct ListLicensesQuery {
    /// Filter by status ("active", "inactive")
    pub status: Option<String>,
    /// Minimum credit balance
    pub min_credit: Option<i64>,
    /// Maximum credit balance
    pub max_credit: Option<i64>,
    /// Substring search over key and bound mac
    pub search: Option<String>,
    /// Pagination: page number (1-indexed)
    #[serde(default = "default_page")]
    pub page: i64,
    /// Pagination: items per page
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}
fn default_per_page() -> i64 {
    50
}

/// Response for listing licenses.
#[derive(Debug, Serialize)]
pub struct ListLicensesResponse {
    pub licenses: Vec<License>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Request body for creating a new license.
#[derive(Debug, Deserialize)]
pub struct CreateLicenseRequest {
    /// Explicit key; omitted means generate one
    pub key: Option<String>,
    /// Starting credit balance
    #[serde(default)]
    pub credit: i64,
    /// Starting status; defaults to "active"
    pub status: Option<String>,
    /// Pre-bound device fingerprint
    pub mac_id: Option<String>,
}

/// Request body for batch-generating licenses.
#[derive(Debug, Deserialize)]
pub struct GenerateLicensesRequest {
    /// Number of licenses to generate (1..=1000)
    pub count: i64,
    /// Starting credit balance applied to each
    #[serde(default)]
    pub credit: i64,
}

/// Response for batch-generate.
#[derive(Debug, Serialize)]
pub struct GenerateLicensesResponse {
    pub created: i64,
    pub keys: Vec<String>,
}

/// Request body for importing licenses.
#[derive(Debug, Deserialize)]
pub struct ImportLicensesRequest {
    /// Line-delimited license keys
    pub keys: String,
    /// Starting credit balance applied to each
    #[serde(default)]
    pub credit: i64,
}

/// Response for import operations.
#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: i64,
    pub skipped: i64,
}

/// Request body for updating a license.
///
/// Absent fields are left untouched. An empty `mac_id` clears the binding.
#[derive(Debug, Deserialize)]
pub struct UpdateLicenseRequest {
    pub status: Option<String>,
    pub credit: Option<i64>,
    pub mac_id: Option<String>,
}

/// Request body for adding an api key.
#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub api_key: String,
    /// Defaults to "active"
    pub status: Option<String>,
    pub note: Option<String>,
}

/// Request body for importing api keys.
#[derive(Debug, Deserialize)]
pub struct ImportApiKeysRequest {
    /// Line-delimited api keys
    pub keys: String,
    pub note: Option<String>,
}

/// Request body for updating an api key.
#[derive(Debug, Deserialize)]
pub struct UpdateApiKeyRequest {
    pub status: Option<String>,
    /// Force the checkout flag; admins can unwedge a stuck key
    pub in_use: Option<bool>,
    pub note: Option<String>,
}

/// One price in a bulk upsert.
#[derive(Debug, Deserialize)]
pub struct PriceUpsert {
    pub model: String,
    pub price: i64,
}

/// Request body for bulk-upserting prices.
#[derive(Debug, Deserialize)]
pub struct UpsertPricesRequest {
    pub prices: Vec<PriceUpsert>,
}

/// Response for a bulk price upsert.
#[derive(Debug, Serialize)]
pub struct UpsertPricesResponse {
    pub updated: i64,
    pub skipped: i64,
    pub prices: Vec<Price>,
}

/// Request body for updating one price.
#[derive(Debug, Deserialize)]
pub struct UpdatePriceRequest {
    pub price: i64,
}

/// Request body for updating the client config row.
///
/// Absent fields are left untouched. `update_links` accepts either a JSON
/// array of URL strings or a raw JSON text containing one.
#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub latest_version: Option<String>,
    pub force_update: Option<bool>,
    pub maintenance: Option<bool>,
    pub maintenance_message: Option<String>,
    pub update_description: Option<String>,
    pub update_links: Option<serde_json::Value>,
}

/// Canonicalize the `update_links` payload into stored JSON text.
fn encode_update_links(value: &serde_json::Value) -> Result<String, AdminError> {
    let links: Vec<String> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value.clone())
            .map_err(|e| AdminError::BadRequest(format!("invalid update_links: {e}")))?,
        serde_json::Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| AdminError::BadRequest(format!("invalid update_links: {e}")))?,
        _ => {
            return Err(AdminError::BadRequest(
                "update_links must be an array of strings".to_string(),
            ))
        }
    };

    serde_json::to_string(&links)
        .map_err(|e| AdminError::BadRequest(format!("invalid update_links: {e}")))
}

/// Query parameters for the activity log listing.
#[derive(Debug, Deserialize)]
pub struct ListLogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: i64,
}

fn default_log_limit() -> i64 {
    100
}

/// Response for the activity log listing.
#[derive(Debug, Serialize)]
pub struct ListLogsResponse {
    pub logs: Vec<ActivityLog>,
}

/// Full data export.
#[derive(Debug, Serialize)]
pub struct BackupResponse {
    pub licenses: Vec<License>,
    pub api_keys: Vec<ApiKey>,
    pub prices: Vec<Price>,
    pub config: Option<AppConfig>,
    pub activity_log: Vec<ActivityLog>,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Generate a unique license key, checking for collisions.
async fn generate_unique_license_key(state: &AppState) -> Result<String, AdminError> {
    // Try up to 10 times to generate a unique key
    for _ in 0..10 {
        let key = generate_license_key_from_config()?;
        if !state.store.license_key_exists(&key).await? {
            return Ok(key);
        }
    }

    Err(AdminError::DatabaseError(
        "failed to generate unique license key after 10 attempts".to_string(),
    ))
}

fn validate_status(status: &str) -> Result<(), AdminError> {
    match status {
        "active" | "inactive" => Ok(()),
        other => Err(AdminError::BadRequest(format!(
            "status must be 'active' or 'inactive', got '{other}'"
        ))),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Verify admin credentials.
///
/// `GET|POST /api/v1/admin/login`
///
/// Authentication happens in the middleware; reaching this handler means
/// the credentials were accepted.
pub async fn login_handler() -> Result<Json<LoginResponse>, AdminError> {
    let config = crate::config::get_config()?;

    Ok(Json(LoginResponse {
        success: true,
        user: config.admin.username.clone(),
    }))
}

/// List licenses with filters and pagination.
///
/// `GET /api/v1/admin/licenses`
pub async fn list_licenses_handler(
    State(state): State<AppState>,
    Query(query): Query<ListLicensesQuery>,
) -> Result<Json<ListLicensesResponse>, AdminError> {
    let page = query.page.max(1);
    let per_page = query.per_page.clamp(1, 500);

    let filter = LicenseFilter {
        status: query.status,
        min_credit: query.min_credit,
        max_credit: query.max_credit,
        search: query.search,
        limit: per_page,
        offset: (page - 1) * per_page,
    };

    let (licenses, total) = state.store.list_licenses(&filter).await?;
    let total_pages = (total + per_page - 1) / per_page;

    Ok(Json(ListLicensesResponse {
        licenses,
        total,
        page,
        per_page,
        total_pages,
    }))
}

/// Create a new license.
///
/// `POST /api/v1/admin/licenses`
pub async fn create_license_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateLicenseRequest>,
) -> Result<(StatusCode, Json<License>), AdminError> {
    if payload.credit < 0 {
        return Err(AdminError::BadRequest(
            "credit must not be negative".to_string(),
        ));
    }

    let status = payload.status.unwrap_or_else(|| "active".to_string());
    validate_status(&status)?;

    let key = match payload.key {
        Some(key) => {
            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(AdminError::BadRequest("key must not be empty".to_string()));
            }
            if state.store.license_key_exists(&key).await? {
                return Err(AdminError::Conflict(format!(
                    "license key '{key}' already exists"
                )));
            }
            key
        }
        None => generate_unique_license_key(&state).await?,
    };

    let mac = payload
        .mac_id
        .as_deref()
        .map(normalize_mac)
        .filter(|m| !m.is_empty());

    let license = state
        .store
        .insert_license(&key, mac.as_deref(), &status, payload.credit)
        .await?;

    info!("Created license key={key} credit={}", payload.credit);
    let _ = state
        .store
        .log_activity("license.create", &format!("key={key}"))
        .await;

    Ok((StatusCode::CREATED, Json(license)))
}

/// Batch-generate licenses.
///
/// `POST /api/v1/admin/licenses/generate`
pub async fn generate_licenses_handler(
    State(state): State<AppState>,
    Json(payload): Json<GenerateLicensesRequest>,
) -> Result<(StatusCode, Json<GenerateLicensesResponse>), AdminError> {
    if payload.count < 1 {
        return Err(AdminError::BadRequest(
            "count must be greater than 0".to_string(),
        ));
    }
    if payload.count > 1000 {
        return Err(AdminError::BadRequest(
            "count must not exceed 1000".to_string(),
        ));
    }
    if payload.credit < 0 {
        return Err(AdminError::BadRequest(
            "credit must not be negative".to_string(),
        ));
    }

    let mut keys = Vec::with_capacity(payload.count as usize);
    for _ in 0..payload.count {
        let key = generate_unique_license_key(&state).await?;
        state
            .store
            .insert_license(&key, None, "active", payload.credit)
            .await?;
        keys.push(key);
    }

    info!("Generated {} licenses", keys.len());
    let _ = state
        .store
        .log_activity("license.generate", &format!("count={}", keys.len()))
        .await;

    Ok((
        StatusCode::CREATED,
        Json(GenerateLicensesResponse {
            created: keys.len() as i64,
            keys,
        }),
    ))
}

/// Import line-delimited license keys.
///
/// `POST /api/v1/admin/licenses/import`
///
/// Blank lines and keys that already exist are skipped, not errors, so a
/// re-run of the same export is harmless.
pub async fn import_licenses_handler(
    State(state): State<AppState>,
    Json(payload): Json<ImportLicensesRequest>,
) -> Result<Json<ImportResponse>, AdminError> {
    if payload.credit < 0 {
        return Err(AdminError::BadRequest(
            "credit must not be negative".to_string(),
        ));
    }

    let mut imported = 0;
    let mut skipped = 0;

    for line in payload.keys.lines() {
        let key = line.trim();
        if key.is_empty() {
            continue;
        }

        if state.store.license_key_exists(key).await? {
            skipped += 1;
            continue;
        }

        state
            .store
            .insert_license(key, None, "active", payload.credit)
            .await?;
        imported += 1;
    }

    info!("Imported {imported} licenses ({skipped} skipped)");
    let _ = state
        .store
        .log_activity(
            "license.import",
            &format!("imported={imported} skipped={skipped}"),
        )
        .await;

    Ok(Json(ImportResponse { imported, skipped }))
}

/// Get a single license by id.
///
/// `GET /api/v1/admin/licenses/{id}`
pub async fn get_license_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<License>, AdminError> {
    let license = state
        .store
        .get_license(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("license {id}")))?;

    Ok(Json(license))
}

/// Update a license.
///
/// `PATCH /api/v1/admin/licenses/{id}`
pub async fn update_license_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateLicenseRequest>,
) -> Result<Json<License>, AdminError> {
    let current = state
        .store
        .get_license(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("license {id}")))?;

    let status = match payload.status {
        Some(status) => {
            validate_status(&status)?;
            status
        }
        None => current.status,
    };

    let credit = payload.credit.unwrap_or(current.credit);
    if credit < 0 {
        return Err(AdminError::BadRequest(
            "credit must not be negative".to_string(),
        ));
    }

    // mac_id semantics: absent = keep, empty string = clear, value = rebind.
    let mac = match payload.mac_id {
        None => current.mac_id,
        Some(mac) => {
            let mac = normalize_mac(&mac);
            if mac.is_empty() {
                None
            } else {
                Some(mac)
            }
        }
    };

    if !state
        .store
        .update_license(id, mac.as_deref(), &status, credit)
        .await?
    {
        return Err(AdminError::NotFound(format!("license {id}")));
    }

    let _ = state
        .store
        .log_activity("license.update", &format!("id={id}"))
        .await;

    let updated = state
        .store
        .get_license(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("license {id}")))?;

    Ok(Json(updated))
}

/// Delete a license.
///
/// `DELETE /api/v1/admin/licenses/{id}`
pub async fn delete_license_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AdminError> {
    if !state.store.delete_license(id).await? {
        return Err(AdminError::NotFound(format!("license {id}")));
    }

    info!("Deleted license id={id}");
    let _ = state
        .store
        .log_activity("license.delete", &format!("id={id}"))
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Clear the device binding so the license can bind to a new machine.
///
/// `POST /api/v1/admin/licenses/{id}/unbind`
pub async fn unbind_license_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<License>, AdminError> {
    let current = state
        .store
        .get_license(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("license {id}")))?;

    state
        .store
        .update_license(id, None, &current.status, current.credit)
        .await?;

    info!("Unbound license id={id}");
    let _ = state
        .store
        .log_activity("license.unbind", &format!("id={id}"))
        .await;

    let updated = state
        .store
        .get_license(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("license {id}")))?;

    Ok(Json(updated))
}

/// List all api keys.
///
/// `GET /api/v1/admin/keys`
pub async fn list_api_keys_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ApiKey>>, AdminError> {
    let keys = state.store.list_api_keys().await?;
    Ok(Json(keys))
}

/// Add an api key to the pool.
///
/// `POST /api/v1/admin/keys`
pub async fn create_api_key_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<ApiKey>), AdminError> {
    let api_key = payload.api_key.trim().to_string();
    if api_key.is_empty() {
        return Err(AdminError::BadRequest(
            "api_key must not be empty".to_string(),
        ));
    }

    let status = payload.status.unwrap_or_else(|| "active".to_string());
    validate_status(&status)?;

    if state.store.api_key_exists(&api_key).await? {
        return Err(AdminError::Conflict("api key already exists".to_string()));
    }

    let key = state
        .store
        .insert_api_key(&api_key, &status, payload.note.as_deref())
        .await?;

    info!("Added api key id={}", key.id);
    let _ = state
        .store
        .log_activity("api_key.create", &format!("id={}", key.id))
        .await;

    Ok((StatusCode::CREATED, Json(key)))
}

/// Import line-delimited api keys.
///
/// `POST /api/v1/admin/keys/import`
pub async fn import_api_keys_handler(
    State(state): State<AppState>,
    Json(payload): Json<ImportApiKeysRequest>,
) -> Result<Json<ImportResponse>, AdminError> {
    let mut imported = 0;
    let mut skipped = 0;

    for line in payload.keys.lines() {
        let key = line.trim();
        if key.is_empty() {
            continue;
        }

        if state.store.api_key_exists(key).await? {
            skipped += 1;
            continue;
        }

        state
            .store
            .insert_api_key(key, "active", payload.note.as_deref())
            .await?;
        imported += 1;
    }

    info!("Imported {imported} api keys ({skipped} skipped)");
    let _ = state
        .store
        .log_activity(
            "api_key.import",
            &format!("imported={imported} skipped={skipped}"),
        )
        .await;

    Ok(Json(ImportResponse { imported, skipped }))
}

/// Update an api key.
///
/// `PATCH /api/v1/admin/keys/{id}`
pub async fn update_api_key_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateApiKeyRequest>,
) -> Result<Json<ApiKey>, AdminError> {
    let current = state
        .store
        .get_api_key(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("api key {id}")))?;

    let status = match payload.status {
        Some(status) => {
            validate_status(&status)?;
            status
        }
        None => current.status,
    };
    let in_use = payload.in_use.unwrap_or(current.in_use);
    let note = match payload.note {
        Some(note) => Some(note),
        None => current.note,
    };

    if !state
        .store
        .update_api_key(id, &status, in_use, note.as_deref())
        .await?
    {
        return Err(AdminError::NotFound(format!("api key {id}")));
    }

    let _ = state
        .store
        .log_activity("api_key.update", &format!("id={id}"))
        .await;

    let updated = state
        .store
        .get_api_key(id)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("api key {id}")))?;

    Ok(Json(updated))
}

/// Delete an api key.
///
/// `DELETE /api/v1/admin/keys/{id}`
pub async fn delete_api_key_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AdminError> {
    if !state.store.delete_api_key(id).await? {
        return Err(AdminError::NotFound(format!("api key {id}")));
    }

    info!("Deleted api key id={id}");
    let _ = state
        .store
        .log_activity("api_key.delete", &format!("id={id}"))
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// List all prices.
///
/// `GET /api/v1/admin/prices`
pub async fn list_prices_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<Price>>, AdminError> {
    let prices = state.store.list_prices().await?;
    Ok(Json(prices))
}

/// Bulk-upsert prices by model name.
///
/// `PUT|POST /api/v1/admin/prices`
///
/// Invalid entries (blank model, negative price) are skipped rather than
/// failing the batch; the response reports how many rows were touched.
pub async fn upsert_prices_handler(
    State(state): State<AppState>,
    Json(payload): Json<UpsertPricesRequest>,
) -> Result<Json<UpsertPricesResponse>, AdminError> {
    let mut updated = 0;
    let mut skipped = 0;

    for entry in &payload.prices {
        let model = entry.model.trim();
        if model.is_empty() || entry.price < 0 {
            skipped += 1;
            continue;
        }

        state.store.upsert_price(model, entry.price).await?;
        updated += 1;
    }

    let _ = state
        .store
        .log_activity("price.upsert", &format!("updated={updated} skipped={skipped}"))
        .await;

    let prices = state.store.list_prices().await?;
    Ok(Json(UpsertPricesResponse {
        updated,
        skipped,
        prices,
    }))
}

/// Update one price by id.
///
/// `PATCH /api/v1/admin/prices/{id}`
pub async fn update_price_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePriceRequest>,
) -> Result<Json<Vec<Price>>, AdminError> {
    if payload.price < 0 {
        return Err(AdminError::BadRequest(
            "price must not be negative".to_string(),
        ));
    }

    if !state.store.update_price(id, payload.price).await? {
        return Err(AdminError::NotFound(format!("price {id}")));
    }

    let _ = state
        .store
        .log_activity("price.update", &format!("id={id}"))
        .await;

    let prices = state.store.list_prices().await?;
    Ok(Json(prices))
}

/// Get the client config row.
///
/// `GET /api/v1/admin/config`
pub async fn get_app_config_handler(
    State(state): State<AppState>,
) -> Result<Json<AppConfig>, AdminError> {
    let cfg = state
        .store
        .get_app_config()
        .await?
        .ok_or_else(|| AdminError::NotFound("config".to_string()))?;

    Ok(Json(cfg))
}

/// Update the client config row.
///
/// `PUT|POST /api/v1/admin/config`
pub async fn update_app_config_handler(
    State(state): State<AppState>,
    Json(payload): Json<UpdateConfigRequest>,
) -> Result<Json<AppConfig>, AdminError> {
    let mut cfg = state
        .store
        .get_app_config()
        .await?
        .ok_or_else(|| AdminError::NotFound("config".to_string()))?;

    if let Some(v) = payload.latest_version {
        cfg.latest_version = v;
    }
    if let Some(v) = payload.force_update {
        cfg.force_update = v;
    }
    if let Some(v) = payload.maintenance {
        cfg.maintenance = v;
    }
    if let Some(v) = payload.maintenance_message {
        cfg.maintenance_message = Some(v);
    }
    if let Some(v) = payload.update_description {
        cfg.update_description = Some(v);
    }
    if let Some(links) = payload.update_links {
        cfg.update_links = encode_update_links(&links)?;
    }

    state.store.update_app_config(&cfg).await?;

    let _ = state.store.log_activity("config.update", "").await;

    let updated = state
        .store
        .get_app_config()
        .await?
        .ok_or_else(|| AdminError::NotFound("config".to_string()))?;

    Ok(Json(updated))
}

/// Recent activity log entries, newest first.
///
/// `GET /api/v1/admin/logs`
pub async fn list_logs_handler(
    State(state): State<AppState>,
    Query(query): Query<ListLogsQuery>,
) -> Result<Json<ListLogsResponse>, AdminError> {
    let limit = query.limit.clamp(1, 1000);
    let logs = state.store.list_activity(limit).await?;

    Ok(Json(ListLogsResponse { logs }))
}

/// Full export of licenses, api keys, prices, config, and the activity log.
///
/// `GET /api/v1/admin/backup`
pub async fn backup_handler(
    State(state): State<AppState>,
) -> Result<Json<BackupResponse>, AdminError> {
    let licenses = state.store.all_licenses().await?;
    let api_keys = state.store.list_api_keys().await?;
    let prices = state.store.list_prices().await?;
    let config = state.store.get_app_config().await?;
    let activity_log = state.store.all_activity().await?;

    info!(
        "Backup export: {} licenses, {} api keys",
        licenses.len(),
        api_keys.len()
    );

    Ok(Json(BackupResponse {
        licenses,
        api_keys,
        prices,
        config,
        activity_log,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AmuletError;

    #[test]
    fn store_failures_map_to_admin_errors() {
        let err: AdminError = AmuletError::ConfigError("missing password".into()).into();
        assert!(matches!(err, AdminError::ConfigError(_)));

        let err: AdminError = AmuletError::StorageError("connection refused".into()).into();
        assert!(matches!(err, AdminError::DatabaseError(_)));
    }

    #[test]
    fn admin_errors_map_to_statuses() {
        let cases = [
            (AdminError::NotFound("license 1".into()), StatusCode::NOT_FOUND),
            (AdminError::BadRequest("bad status".into()), StatusCode::BAD_REQUEST),
            (AdminError::Conflict("duplicate key".into()), StatusCode::CONFLICT),
            (
                AdminError::DatabaseError("oops".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
