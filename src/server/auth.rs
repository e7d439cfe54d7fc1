//! HTTP Basic authentication for the admin surface.
//!
//! The admin API is protected by a single shared credential pair from the
//! server configuration. Credentials are compared in constant time so the
//! check does not leak prefix length through timing.

use axum::{
    body::Body,
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ring::constant_time::verify_slices_are_equal;
use serde::Serialize;
use tracing::warn;

use crate::config::get_config;

/// Authentication failure response.
#[derive(Debug, Serialize)]
pub struct AuthError {
    pub success: bool,
    pub error: &'static str,
    pub message: String,
}

impl AuthError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: "UNAUTHORIZED",
            message: message.into(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut response = (StatusCode::UNAUTHORIZED, Json(self)).into_response();
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            header::HeaderValue::from_static("Basic realm=\"amulet-admin\""),
        );
        response
    }
}

/// Parse a `Basic` authorization header value into `(username, password)`.
fn parse_basic_header(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Constant-time equality over the configured credential pair.
fn credentials_match(user: &str, pass: &str, want_user: &str, want_pass: &str) -> bool {
    let user_ok = verify_slices_are_equal(user.as_bytes(), want_user.as_bytes()).is_ok();
    let pass_ok = verify_slices_are_equal(pass.as_bytes(), want_pass.as_bytes()).is_ok();
    user_ok && pass_ok
}

/// Axum middleware guarding the admin routes.
pub async fn admin_auth_middleware(request: Request, next: Next) -> Result<Response<Body>, AuthError> {
    let config = get_config().map_err(|e| {
        warn!("Configuration unavailable during auth: {e}");
        AuthError::new("Server configuration error")
    })?;

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AuthError::new("Authorization header is required"))?;

    let (user, pass) = parse_basic_header(header_value)
        .ok_or_else(|| AuthError::new("Authorization header is malformed"))?;

    if !credentials_match(&user, &pass, &config.admin.username, &config.admin.password) {
        warn!("Rejected admin login for user '{user}'");
        return Err(AuthError::new("Invalid credentials"));
    }

    Ok(next.run(request).await)
}
