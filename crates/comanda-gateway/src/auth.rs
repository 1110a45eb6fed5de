// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Optional bearer-token authentication for the control surface.
//!
//! When a token is configured every action requires
//! `Authorization: Bearer <token>`. Without one the surface is open, which
//! suits a deployment behind a private network or an authenticating proxy.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Authentication configuration for the control surface.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Expected bearer token. `None` disables authentication.
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

impl AuthConfig {
    /// Whether `header` (the raw `Authorization` value) is acceptable.
    pub fn accepts(&self, header: Option<&str>) -> bool {
        let Some(expected) = self.bearer_token.as_deref() else {
            return true;
        };
        header
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected)
    }
}

/// Middleware that enforces the bearer token, if one is configured.
pub async fn auth_middleware(
    State(auth): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    if auth.accepts(header) {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "rejecting unauthenticated request");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_when_no_token_configured() {
        let config = AuthConfig::default();
        assert!(config.accepts(None));
        assert!(config.accepts(Some("Bearer anything")));
    }

    #[test]
    fn token_must_match_exactly() {
        let config = AuthConfig {
            bearer_token: Some("secret-token".to_string()),
        };
        assert!(config.accepts(Some("Bearer secret-token")));
        assert!(!config.accepts(Some("Bearer secret-token2")));
        assert!(!config.accepts(Some("secret-token")));
        assert!(!config.accepts(None));
    }

    #[test]
    fn debug_redacts_token() {
        let config = AuthConfig {
            bearer_token: Some("secret-token".to_string()),
        };
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("secret-token"));
        assert!(debug_output.contains("[redacted]"));
    }
}
