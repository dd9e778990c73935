//! Bearer-token authentication for the `/schedules` routes.
//!
//! `auth.operator_token` resolves to [`Caller::Operator`]; each entry of
//! `auth.tenant_tokens` resolves to [`Caller::Tenant`] for that tenant only.

use axum::http::HeaderMap;
use cadence_controller::Caller;
use cadence_core::config::AuthConfig;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::http::error::ApiError;

/// Resolve the caller from the `Authorization: Bearer <token>` header.
pub fn authenticate(auth: &AuthConfig, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let token = bearer_token(headers).map_err(|reason| {
        warn!(reason = %reason, "request rejected: no credentials");
        ApiError::unauthorized()
    })?;

    resolve(auth, token).ok_or_else(|| {
        warn!("request rejected: unknown bearer token");
        ApiError::unauthorized()
    })
}

/// Map a presented token onto a caller. Empty configured tokens never match.
pub fn resolve(auth: &AuthConfig, token: &str) -> Option<Caller> {
    let presented = digest(token);
    let matches = |configured: &str| !configured.is_empty() && digest(configured) == presented;

    if auth.operator_token.as_deref().is_some_and(matches) {
        return Some(Caller::Operator);
    }
    auth.tenant_tokens
        .iter()
        .find(|(_, configured)| matches(configured.as_str()))
        .map(|(tenant_id, _)| Caller::Tenant(tenant_id.clone()))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, String> {
    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing Authorization header".to_string())?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or_else(|| "Authorization header must use Bearer scheme".to_string())
}

// Tokens are compared as SHA-256 digests so comparison time does not track the secret.
fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}
