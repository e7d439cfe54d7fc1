// src/server/mod.rs

//! Server-side components for Amulet.
//!
//! This module contains:
//! - `store`       → DB abstraction over SQLite/Postgres
//! - `client_api`  → Client protocol handlers (check/debit/refund/key pool)
//! - `routes`      → Router builder
//! - `logging`     → Request logging middleware and health probe
//! - `validation`  → Request validation utilities
//! - `auth`        → Basic auth middleware (requires `admin-api` feature)
//! - `admin`       → Admin CRUD surface (requires `admin-api` feature)

pub mod client_api;
pub mod logging;
pub mod routes;
pub mod store;
pub mod validation;

#[cfg(feature = "admin-api")]
pub mod admin;

#[cfg(feature = "admin-api")]
pub mod auth;

// Optional: convenient re-exports so callers can do `amulet::server::X`
// instead of digging into submodules.

pub use client_api::{
    check_handler, deactivate_key_handler, debit_handler, get_config_handler, get_prices_handler,
    next_key_handler, refund_handler, release_key_handler, AckResponse, AppState, CheckRequest,
    CheckResponse, ClientError, ClientErrorCode, ConfigResponse, DeactivateKeyRequest,
    DebitRequest, DebitResponse, NextKeyResponse, PricesResponse, RefundRequest,
    RefundResponse, ReleaseKeyRequest,
};
pub use routes::build_router;
pub use store::{ActivityLog, ApiKey, AppConfig, License, LicenseFilter, Price, Store};

pub use logging::{request_logging_middleware, HealthResponse, REQUEST_ID_HEADER};

pub use validation::{normalize_mac, validate_count, validate_not_empty, ValidationError,
    ValidationResult};

#[cfg(feature = "admin-api")]
pub use auth::{admin_auth_middleware, AuthError};

#[cfg(feature = "admin-api")]
pub use admin::{
    backup_handler, create_api_key_handler, create_license_handler, delete_api_key_handler,
    delete_license_handler, generate_licenses_handler, get_app_config_handler,
    get_license_handler, import_api_keys_handler, import_licenses_handler, list_api_keys_handler,
    list_licenses_handler, list_logs_handler, list_prices_handler, login_handler,
    unbind_license_handler, update_api_key_handler, update_app_config_handler,
    update_license_handler, update_price_handler, upsert_prices_handler, AdminError,
};
