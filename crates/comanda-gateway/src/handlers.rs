// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Action handlers for the control surface.
//!
//! Both routes funnel into [`dispatch`], which checks the method, parses the
//! body where one is needed and calls the connection manager.

use std::str::FromStr;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use comanda_core::ComandaError;
use comanda_whatsapp::{ConnectionStatus, MonitorSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::server::GatewayState;

/// Actions served by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    Status,
    Connect,
    Disconnect,
    Send,
    Health,
    Retry,
    Reset,
}

impl Action {
    /// Whether `method` may invoke this action.
    pub fn allows(self, method: &Method) -> bool {
        match self {
            Action::Status | Action::Health => true,
            Action::Connect => method == Method::GET || method == Method::POST,
            Action::Disconnect | Action::Send | Action::Retry | Action::Reset => {
                method == Method::POST
            }
        }
    }
}

/// Query string of the base route.
#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    #[serde(default)]
    pub action: Option<String>,
}

/// Body of the `send` action.
#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `status` and `connect`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: ConnectionStatus,
    pub monitoring: MonitorSnapshot,
    pub timestamp: DateTime<Utc>,
}

/// Body of `health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub monitoring: MonitorSnapshot,
}

/// Body of `send`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    pub message_id: String,
    pub jid: String,
}

/// An error rendered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn method_not_allowed(action: Action) -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: format!("Method not allowed for action: {action}"),
        }
    }
}

impl From<ComandaError> for ApiError {
    fn from(err: ComandaError) -> Self {
        let status = match &err {
            ComandaError::Validation(_) | ComandaError::NotConnected => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "action failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// `{base}?action=<name>`
pub async fn dispatch_query(
    State(state): State<GatewayState>,
    method: Method,
    Query(query): Query<ActionQuery>,
    body: Bytes,
) -> Response {
    respond(dispatch(&state, &method, query.action.as_deref(), &body).await)
}

/// `{base}/<name>`
pub async fn dispatch_path(
    State(state): State<GatewayState>,
    method: Method,
    Path(action): Path<String>,
    body: Bytes,
) -> Response {
    respond(dispatch(&state, &method, Some(&action), &body).await)
}

fn respond(result: Result<Response, ApiError>) -> Response {
    result.unwrap_or_else(IntoResponse::into_response)
}

/// Resolve and run one action.
pub async fn dispatch(
    state: &GatewayState,
    method: &Method,
    action: Option<&str>,
    body: &[u8],
) -> Result<Response, ApiError> {
    let raw = action.unwrap_or_default();
    let action =
        Action::from_str(raw).map_err(|_| ApiError::bad_request(format!("Invalid action: {raw}")))?;
    if !action.allows(method) {
        return Err(ApiError::method_not_allowed(action));
    }
    tracing::debug!(%action, %method, "dispatching action");

    let manager = &state.manager;
    let response = match action {
        Action::Status => Json(status_response(state).await).into_response(),
        Action::Connect => {
            manager.connect().await?;
            Json(status_response(state).await).into_response()
        }
        Action::Disconnect => {
            manager.disconnect().await;
            Json(json!({ "success": true })).into_response()
        }
        Action::Send => {
            let (to, message) = parse_send(body)?;
            let sent = manager.send_message(&to, &message).await?;
            Json(SendResponse {
                success: true,
                message_id: sent.message_id,
                jid: sent.jid,
            })
            .into_response()
        }
        Action::Health => Json(HealthResponse {
            status: "healthy",
            monitoring: manager.monitoring().await,
        })
        .into_response(),
        Action::Retry => Json(manager.retry().await).into_response(),
        Action::Reset => {
            manager.reset().await;
            Json(json!({ "success": true, "message": "WhatsApp session reset" })).into_response()
        }
    };
    Ok(response)
}

async fn status_response(state: &GatewayState) -> StatusResponse {
    StatusResponse {
        status: state.manager.status().await,
        monitoring: state.manager.monitoring().await,
        timestamp: Utc::now(),
    }
}

fn parse_send(body: &[u8]) -> Result<(String, String), ApiError> {
    let request: SendRequest = if body.is_empty() {
        SendRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?
    };
    match (request.to, request.message) {
        (Some(to), Some(message)) if !to.trim().is_empty() && !message.is_empty() => {
            Ok((to, message))
        }
        _ => Err(ApiError::bad_request(
            "Missing required fields: to, message",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_parse_from_snake_case() {
        assert_eq!(Action::from_str("status").unwrap(), Action::Status);
        assert_eq!(Action::from_str("reset").unwrap(), Action::Reset);
        assert!(Action::from_str("Status").is_err());
        assert!(Action::from_str("").is_err());
    }

    #[test]
    fn method_policy() {
        assert!(Action::Status.allows(&Method::DELETE));
        assert!(Action::Health.allows(&Method::POST));
        assert!(Action::Connect.allows(&Method::GET));
        assert!(Action::Connect.allows(&Method::POST));
        assert!(!Action::Connect.allows(&Method::PUT));
        assert!(!Action::Send.allows(&Method::GET));
        assert!(!Action::Reset.allows(&Method::GET));
        assert!(Action::Retry.allows(&Method::POST));
    }

    #[test]
    fn send_body_requires_both_fields() {
        assert!(parse_send(b"").is_err());
        assert!(parse_send(br#"{"to":"11987654321"}"#).is_err());
        assert!(parse_send(br#"{"to":"  ","message":"hi"}"#).is_err());
        assert!(parse_send(b"not json").is_err());
        let (to, message) = parse_send(br#"{"to":"11987654321","message":"hi"}"#).unwrap();
        assert_eq!(to, "11987654321");
        assert_eq!(message, "hi");
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            ApiError::from(ComandaError::NotConnected).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ComandaError::Validation("bad".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ComandaError::Encryption("no key".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(ComandaError::channel("down")).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
