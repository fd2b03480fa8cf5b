//! Server Startup Tests
//!
//! Tests for configuration loading, route assembly and connection-limit
//! wiring, without any upstream traffic.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
};
use serial_test::serial;
use tempfile::TempDir;
use tower::util::ServiceExt;

use duplex_gateway::{ServerConfig, routes, state::AppState};

/// Helper function to create a minimal test configuration
fn create_minimal_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 3001,
        tls: None,
        gemini_api_key: "test-key".to_string(),
        gemini_model: "gemini-test".to_string(),
        gemini_live_url: None,
        gemini_voice: None,
        system_instruction: None,
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 60,
        rate_limit_burst_size: 10,
        max_websocket_connections: None,
        max_connections_per_ip: 100,
        idle_timeout_seconds: 300,
        tool_timeout_ms: 5000,
    }
}

fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

fn upgrade_request() -> Request<Body> {
    Request::builder()
        .uri("/realtime")
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .extension(ConnectInfo(peer()))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = routes::create_app(AppState::new(create_minimal_config()).await);

    let request = Request::builder()
        .uri("/")
        .extension(ConnectInfo(peer()))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, serde_json::json!({"status": "OK"}));
}

#[tokio::test]
async fn test_realtime_requires_upgrade() {
    let app = routes::create_app(AppState::new(create_minimal_config()).await);

    let request = Request::builder()
        .uri("/realtime")
        .extension(ConnectInfo(peer()))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unfinished_upgrade_releases_slot() {
    let state = AppState::new(create_minimal_config()).await;
    let app = routes::create_app(state.clone());

    // oneshot has no real connection to upgrade, so the handshake fails
    let response = app.oneshot(upgrade_request()).await.unwrap();

    assert_ne!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(state.ws_connection_count(), 0);
    assert_eq!(state.ip_connection_count(&peer().ip()), 0);
}

#[tokio::test]
async fn test_global_connection_limit_applies_to_realtime() {
    let mut config = create_minimal_config();
    config.max_websocket_connections = Some(0);
    let app = routes::create_app(AppState::new(config).await);

    let response = app.oneshot(upgrade_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_concurrent_app_state_creation() {
    let mut handles = Vec::new();
    for _ in 0..10 {
        handles.push(tokio::spawn(async {
            let state: Arc<AppState> = AppState::new(create_minimal_config()).await;
            state.tools.len()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 1);
    }
}

#[test]
fn test_address_and_timeouts() {
    let config = create_minimal_config();
    assert_eq!(config.address(), "127.0.0.1:3001");
    assert!(!config.is_tls_enabled());
    assert_eq!(config.idle_timeout().as_secs(), 300);
    assert_eq!(config.tool_timeout().as_millis(), 5000);
}

#[test]
#[serial]
fn test_yaml_config_boot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        r#"
server:
  host: "127.0.0.1"
  port: 4100
gemini:
  api_key: "yaml-key"
  voice: "Puck"
session:
  idle_timeout_seconds: 60
"#,
    )
    .unwrap();

    let config = ServerConfig::from_file(&path).unwrap();

    assert_eq!(config.address(), "127.0.0.1:4100");
    assert_eq!(config.gemini_api_key, "yaml-key");
    assert_eq!(config.gemini_voice.as_deref(), Some("Puck"));
    assert_eq!(config.idle_timeout_seconds, 60);
}

#[tokio::test]
async fn test_graceful_shutdown_cancels_registered_sessions() {
    let state = AppState::new(create_minimal_config()).await;
    let token = state.register_session(uuid::Uuid::new_v4(), Some(peer().ip()));

    state.shutdown();

    tokio::time::timeout(std::time::Duration::from_secs(1), token.cancelled())
        .await
        .expect("session token was not cancelled");
}
