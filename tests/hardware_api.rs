//! Router-level tests for the hardware service
//!
//! These run against a manager with no GPIO and no boards attached; they
//! exercise the route contracts that must hold before any hardware is
//! touched.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use dacroq::config::DeviceCatalog;
use dacroq::gpio::GpioResetController;
use dacroq::hardware::manager::DeviceManager;
use dacroq::server::hardware_api::{router, HardwareState};

fn build_app() -> Router {
    let manager = Arc::new(DeviceManager::with_gpio(
        DeviceCatalog::default(),
        GpioResetController::unavailable(),
    ));
    router(HardwareState::new(manager))
}

async fn request(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_and_index_respond() {
    let app = build_app();

    let (status, body) = request(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = request(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Dacroq Hardware API");
}

#[tokio::test]
async fn gpio_status_reports_unavailable_host() {
    let app = build_app();
    let (status, body) = request(&app, Method::GET, "/hardware/gpio/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], false);
}

#[tokio::test]
async fn reset_unknown_device_is_bad_request() {
    let app = build_app();
    let (status, body) = request(&app, Method::POST, "/hardware/reset/fpga", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("fpga"));
}

#[tokio::test]
async fn reset_without_gpio_fails_cleanly() {
    let app = build_app();

    let (status, body) = request(&app, Method::POST, "/hardware/reset/ldpc", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("GPIO"));

    let (status, _) = request(&app, Method::POST, "/hardware/reset/all", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn hardware_status_reports_empty_registrations() {
    let app = build_app();
    let (status, body) = request(&app, Method::GET, "/hardware/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hardware_manager"]["total_devices"], 0);
    assert_eq!(body["ldpc_connected"], false);
    assert_eq!(body["sat_connected"], false);
}

#[tokio::test]
async fn empty_command_is_rejected_before_hardware_access() {
    let app = build_app();

    for uri in ["/ldpc/command", "/sat/command"] {
        let (status, body) =
            request(&app, Method::POST, uri, Some(json!({"command": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }
}

#[tokio::test]
async fn sat_solve_requires_dimacs() {
    let app = build_app();
    let (status, body) = request(&app, Method::POST, "/sat/solve", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("DIMACS"));
}

#[tokio::test]
async fn session_break_without_connections_reports_status() {
    let app = build_app();
    let (status, body) = request(
        &app,
        Method::POST,
        "/session-break",
        Some(json!({"text": "run boundary"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["separator_text"], "run boundary");
    assert_eq!(body["results"]["ldpc"], "No active connection");
    assert_eq!(body["results"]["sat"], "No active connection");
}
