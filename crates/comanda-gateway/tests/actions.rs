// SPDX-FileCopyrightText: 2026 Comanda Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Control surface tests: each request goes through the full router
//! (auth, CORS, dispatch) against a harness-built connection manager.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use comanda_gateway::{build_router, AuthConfig, GatewayState};
use comanda_test_utils::{ConnectBehavior, TestHarness, TEST_SESSION_ID};
use comanda_whatsapp::ConnectionState;
use serde_json::{json, Value};
use tower::ServiceExt;

const BASE: &str = "/api/whatsapp";

fn router(harness: &TestHarness) -> Router {
    router_with_auth(harness, AuthConfig::default())
}

fn router_with_auth(harness: &TestHarness, auth: AuthConfig) -> Router {
    build_router(
        BASE,
        GatewayState {
            manager: harness.manager.clone(),
            auth,
        },
    )
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn connected() -> TestHarness {
    let harness = TestHarness::builder().build().await.unwrap();
    harness.seed_session().await.unwrap();
    harness.manager.connect().await.unwrap();
    harness.wait_for_state(ConnectionState::Connected).await;
    harness
}

// ---- Dispatch ----

#[tokio::test]
async fn status_via_query_and_path() {
    let harness = TestHarness::builder().build().await.unwrap();
    let app = router(&harness);

    for uri in ["/api/whatsapp?action=status", "/api/whatsapp/status"] {
        let (status, body) = call(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isConnected"], false);
        assert_eq!(body["connectionState"], "disconnected");
        assert!(body["qrCode"].is_null());
        assert_eq!(body["monitoring"]["retryCount"], 0);
        assert_eq!(body["monitoring"]["isRetrying"], false);
        assert!(body["timestamp"].is_string());
    }
}

#[tokio::test]
async fn unknown_or_missing_action_is_400() {
    let harness = TestHarness::builder().build().await.unwrap();
    let app = router(&harness);

    let (status, body) = call(&app, Method::GET, "/api/whatsapp?action=explode", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid action: explode");

    let (status, _) = call(&app, Method::GET, "/api/whatsapp", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mutating_actions_require_post() {
    let harness = TestHarness::builder().build().await.unwrap();
    let app = router(&harness);

    for action in ["disconnect", "send", "retry", "reset"] {
        let (status, body) = call(&app, Method::GET, &format!("{BASE}/{action}"), None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{action}");
        assert!(body["error"].as_str().unwrap().contains(action));
    }
    let (status, _) = call(&app, Method::PUT, &format!("{BASE}/connect"), None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn responses_carry_cors_headers() {
    let harness = TestHarness::builder().build().await.unwrap();
    let app = router(&harness);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/whatsapp/health")
                .header(header::ORIGIN, "https://painel.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

// ---- Actions ----

#[tokio::test]
async fn connect_without_session_reports_pairing() {
    let harness = TestHarness::builder().build().await.unwrap();
    let app = router(&harness);

    let (status, body) = call(&app, Method::POST, &format!("{BASE}/connect"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(matches!(
        body["connectionState"].as_str(),
        Some("connecting" | "qr_required")
    ));

    harness.wait_for_state(ConnectionState::QrRequired).await;
    let (_, body) = call(&app, Method::GET, &format!("{BASE}/status"), None).await;
    assert_eq!(body["connectionState"], "qr_required");
    assert_eq!(body["qrCode"], "mock-qr-1");
}

#[tokio::test]
async fn connect_failure_is_500_with_message() {
    let harness = TestHarness::builder()
        .with_default_behavior(ConnectBehavior::Fail("bridge unreachable".into()))
        .build()
        .await
        .unwrap();
    let app = router(&harness);

    let (status, body) = call(&app, Method::GET, &format!("{BASE}/connect"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("bridge unreachable"));
}

#[tokio::test]
async fn connect_without_key_is_500() {
    let harness = TestHarness::builder().without_key().build().await.unwrap();
    let app = router(&harness);

    let (status, body) = call(&app, Method::POST, &format!("{BASE}/connect"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("encryption"));
}

#[tokio::test]
async fn send_delivers_to_normalized_number() {
    let harness = connected().await;
    let app = router(&harness);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/whatsapp?action=send",
        Some(json!({ "to": "11 98765-4321", "message": "Pedido #42 confirmado" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["messageId"].as_str().unwrap().starts_with("mock-msg-"));
    assert_eq!(body["jid"], "5511987654321@s.whatsapp.net");
}

#[tokio::test]
async fn send_with_missing_fields_is_400() {
    let harness = connected().await;
    let app = router(&harness);

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("{BASE}/send"),
        Some(json!({ "to": "11987654321" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required fields: to, message");
}

#[tokio::test]
async fn send_while_disconnected_is_400() {
    let harness = TestHarness::builder().build().await.unwrap();
    let app = router(&harness);

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("{BASE}/send"),
        Some(json!({ "to": "11987654321", "message": "oi" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "WhatsApp is not connected");
}

#[tokio::test]
async fn health_reports_monitoring() {
    let harness = connected().await;
    let app = router(&harness);

    let (status, body) = call(&app, Method::GET, &format!("{BASE}/health"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["monitoring"]["healthCheckActive"], true);
    assert!(body["monitoring"]["connectionStartTime"].is_string());
}

#[tokio::test]
async fn retry_while_connected_is_a_noop() {
    let harness = connected().await;
    let app = router(&harness);

    let (status, body) = call(&app, Method::POST, &format!("{BASE}/retry"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Connection already active");
    assert_eq!(harness.client.connect_count(), 1);
}

#[tokio::test]
async fn disconnect_then_reset() {
    let harness = connected().await;
    let app = router(&harness);

    let (status, body) = call(&app, Method::POST, &format!("{BASE}/disconnect"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));
    assert!(harness.store.load(TEST_SESSION_ID).await.unwrap().is_some());

    let (status, body) = call(&app, Method::POST, &format!("{BASE}/reset"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["message"].is_string());
    assert!(harness.store.load(TEST_SESSION_ID).await.unwrap().is_none());

    let (_, body) = call(&app, Method::GET, &format!("{BASE}/status"), None).await;
    assert_eq!(body["connectionState"], "disconnected");
    assert!(body["phoneNumber"].is_null());
    assert!(body["lastConnected"].is_null());
}

// ---- Auth ----

#[tokio::test]
async fn bearer_token_is_enforced_when_configured() {
    let harness = TestHarness::builder().build().await.unwrap();
    let app = router_with_auth(
        &harness,
        AuthConfig {
            bearer_token: Some("cozinha-123".to_string()),
        },
    );

    let (status, body) = call(&app, Method::GET, &format!("{BASE}/status"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("{BASE}/status"))
                .header(header::AUTHORIZATION, "Bearer cozinha-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
