/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Authentication middleware for the Tom API.
//!
//! Four modes, selected globally by configuration: `none`, `api_key`, `jwt`
//! and `hybrid` (API key first, fall through to JWT when no key header is
//! valid). Successful authentication attaches an [`AuthContext`] to the
//! request; the access policy is evaluated afterwards and failing it is a
//! 403, distinct from the 401 of failed authentication.

pub mod claims;
pub mod policy;
pub mod providers;
pub mod validator;

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use claims::Claims;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tom_models::ErrorKind;
use tracing::{debug, warn};

/// The authenticated principal attached to request extensions.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    /// "api_key", "jwt" or "none".
    pub method: &'static str,
    pub user: Option<String>,
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
}

impl AuthContext {
    fn anonymous() -> Self {
        Self {
            method: "none",
            user: None,
            provider: None,
            claims: None,
        }
    }
}

/// Compares two secrets without early exit. Hashing first keeps the
/// comparison length-independent as well.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    let mut diff = 0u8;
    for (x, y) in da.iter().zip(db.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Looks the presented key up in the configured `key:user` pairs.
pub fn lookup_api_key(pairs: &[(String, String)], presented: &str) -> Option<String> {
    let mut matched = None;
    // Walk every entry so timing does not reveal which key prefix matched.
    for (key, user) in pairs {
        if constant_time_eq(key, presented) {
            matched = Some(user.clone());
        }
    }
    matched
}

fn api_key_auth(state: &AppState, request: &Request<Body>) -> Result<AuthContext, ApiError> {
    let pairs = state.settings.controller.api_key_users();
    for header in &state.settings.controller.api_key_headers {
        let Some(presented) = request
            .headers()
            .get(header.as_str())
            .and_then(|v| v.to_str().ok())
        else {
            continue;
        };
        if let Some(user) = lookup_api_key(&pairs, presented) {
            return Ok(AuthContext {
                method: "api_key",
                user: Some(user),
                provider: None,
                claims: None,
            });
        }
    }
    let headers = state.settings.controller.api_key_headers.join("', '");
    Err(ApiError::new(
        ErrorKind::AuthRequired,
        format!("missing or invalid API key; requires one of these headers: '{}'", headers),
    ))
}

fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn jwt_auth(state: &AppState, request: &Request<Body>) -> Result<AuthContext, ApiError> {
    let token = bearer_token(request)
        .ok_or_else(|| ApiError::new(ErrorKind::AuthRequired, "missing or invalid Bearer token"))?;

    if state.settings.controller.jwt_require_https {
        // Behind a proxy the original scheme travels in X-Forwarded-Proto.
        let forwarded = request
            .headers()
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok());
        if forwarded == Some("http") {
            return Err(ApiError::new(
                ErrorKind::AuthRequired,
                "JWT authentication requires HTTPS",
            ));
        }
    }

    let (claims, user, kind) = validator::validate_against(&state.validators, token)
        .map_err(|e| ApiError::new(ErrorKind::AuthRequired, format!("invalid JWT token: {}", e)))?;

    // Access policy runs only for identity-bearing authentication.
    if !state.policy.permits(&user, claims.email_like()) {
        warn!(user = %user, "access denied by policy");
        return Err(ApiError::new(
            ErrorKind::AuthDenied,
            format!("access denied: user '{}' not permitted by policy", user),
        ));
    }

    Ok(AuthContext {
        method: "jwt",
        user: Some(user),
        provider: Some(kind.name().to_string()),
        claims: Some(claims),
    })
}

/// Resolves the principal for a request under the configured auth mode.
pub fn authenticate(state: &AppState, request: &Request<Body>) -> Result<AuthContext, ApiError> {
    match state.settings.controller.auth_mode.as_str() {
        "none" => Ok(AuthContext::anonymous()),
        "api_key" => api_key_auth(state, request),
        "jwt" => jwt_auth(state, request),
        "hybrid" => match api_key_auth(state, request) {
            Ok(ctx) => Ok(ctx),
            Err(_) => jwt_auth(state, request),
        },
        other => Err(ApiError::internal(format!("unknown auth mode '{}'", other))),
    }
}

/// Middleware function enforcing authentication for `/api` routes.
///
/// The resulting `AuthContext` is inserted into request extensions for
/// handlers that want the caller's identity.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = authenticate(&state, &request)?;
    debug!(method = ctx.method, user = ctx.user.as_deref().unwrap_or("-"), "authenticated");
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_agrees_with_equality() {
        assert!(constant_time_eq("abc123", "abc123"));
        assert!(!constant_time_eq("abc123", "abc124"));
        assert!(!constant_time_eq("short", "a-much-longer-secret"));
    }

    #[test]
    fn api_key_lookup_returns_the_mapped_user() {
        let pairs = vec![
            ("key-a".to_string(), "alice".to_string()),
            ("key-b".to_string(), "bob".to_string()),
        ];
        assert_eq!(lookup_api_key(&pairs, "key-b").as_deref(), Some("bob"));
        assert_eq!(lookup_api_key(&pairs, "key-c"), None);
    }
}
