//! Authentication: identity asserted by a trusted fronting proxy.
//!
//! Chatter does not log anyone in itself. When `[auth] enabled = true`, the
//! reverse proxy in front of it authenticates the user and forwards the user
//! id in a header (default `x-authenticated-user`). The middleware lifts that
//! header into an [`AuthUser`] request extension and refuses identity-bound
//! routes (tenant chat, history API) that arrive without one.
//!
//! Room and global chat, health and metrics never need an identity.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::config::AuthConfig;

// =============================================================================
// AuthUser
// =============================================================================

/// Authenticated user, populated from the identity header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

/// Optional auth user (for endpoints that work with or without auth).
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl MaybeAuthUser {
    pub fn into_user_id(self) -> Option<String> {
        self.0.map(|u| u.user_id)
    }
}

// =============================================================================
// Auth State (shared across middleware and handlers)
// =============================================================================

#[derive(Clone)]
pub struct AuthState {
    pub auth_config: Arc<AuthConfig>,
}

// =============================================================================
// Auth Middleware
// =============================================================================

/// Auth middleware for HTTP and WebSocket upgrade routes.
///
/// 1. Auth disabled → pass through untouched
/// 2. Identity header present → insert `AuthUser`
/// 3. Identity-bound route without the header → 401
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let config = &auth_state.auth_config;
    if !config.enabled {
        return next.run(request).await;
    }

    let user_id = request
        .headers()
        .get(config.identity_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    if let Some(user_id) = user_id {
        debug!(user = %user_id, "Request carries authenticated identity");
        request.extensions_mut().insert(AuthUser { user_id });
        return next.run(request).await;
    }

    if requires_identity(request.uri().path()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Authentication required" })),
        )
            .into_response();
    }

    next.run(request).await
}

fn requires_identity(path: &str) -> bool {
    path == "/chat" || path.starts_with("/api/")
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Extract AuthUser from request extensions (set by middleware).
/// Returns 401 if not present.
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Authentication required"})),
            )
        })
    }
}

/// Extract optional AuthUser from request extensions.
impl<S> axum::extract::FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(MaybeAuthUser(parts.extensions.get::<AuthUser>().cloned()))
    }
}
