// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control surface HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the control surface.

use std::any::Any;

use axum::{
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use comanda_config::model::GatewayConfig;
use comanda_core::ComandaError;
use comanda_whatsapp::ConnectionManager;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::auth::{auth_middleware, AuthConfig};
use crate::handlers;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    /// The connection every action operates on.
    pub manager: ConnectionManager,
    /// Authentication configuration.
    pub auth: AuthConfig,
}

impl GatewayState {
    pub fn new(manager: ConnectionManager, config: &GatewayConfig) -> Self {
        Self {
            manager,
            auth: AuthConfig {
                bearer_token: config.bearer_token.clone(),
            },
        }
    }
}

/// Build the router serving every action under `base_path`:
/// - `{base_path}?action=<name>`
/// - `{base_path}/<name>`
pub fn build_router(base_path: &str, state: GatewayState) -> Router {
    let base = base_path.trim_end_matches('/');
    let root = if base.is_empty() { "/" } else { base };

    let api_routes = Router::new()
        .route(root, any(handlers::dispatch_query))
        .route(&format!("{base}/{{action}}"), any(handlers::dispatch_path))
        .route_layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Render a handler panic as a JSON 500.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(%message, "request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

/// Serve the control surface until `shutdown` is cancelled.
pub async fn start_server(
    config: &GatewayConfig,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), ComandaError> {
    let app = build_router(&config.base_path, state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ComandaError::Channel {
            message: format!("failed to bind control surface to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!(base_path = %config.base_path, "control surface listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ComandaError::Channel {
            message: format!("control surface error: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!("control surface stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn boom() -> &'static str {
        panic!("kitchen on fire")
    }

    #[tokio::test]
    async fn panics_become_json_500() {
        let app = Router::new()
            .route("/boom", get(boom))
            .layer(CatchPanicLayer::custom(panic_response));

        let response = app
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "kitchen on fire");
    }

    #[test]
    fn panic_payload_of_unknown_type() {
        let response = panic_response(Box::new(42_u32));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
