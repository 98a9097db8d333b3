//! Router-level tests for the data service

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use dacroq::config::ServiceConfig;
use dacroq::hardware::protocol::{DecodeRow, SnrSummary};
use dacroq::hardware::session::HealthReport;
use dacroq::jobs::ldpc::JobError;
use dacroq::jobs::SnrTestRunner;
use dacroq::server::data_api::{router, DataState};
use dacroq::server::cors_layer;
use dacroq::storage::Database;

struct TestApp {
    _dir: tempfile::TempDir,
    app: Router,
    db: Database,
}

fn test_config() -> ServiceConfig {
    ServiceConfig {
        port: 0,
        allowed_origins: vec!["https://lab.example.edu".into()],
        google_client_id: None,
        dev_mode: false,
        db_path: String::new(),
        hardware_api_url: None,
    }
}

fn build_app(runner: Option<Arc<dyn SnrTestRunner>>) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::new(dir.path().join("api.db"));
    db.init_schema().expect("schema");

    let state = DataState::new(db.clone(), Arc::new(test_config()), runner);
    TestApp {
        _dir: dir,
        app: router(state),
        db,
    }
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
async fn health_reports_uptime() {
    let t = build_app(None);
    let (status, body) = request(&t.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["uptime"].as_f64().is_some());
}

#[tokio::test]
async fn test_crud_round_trip() {
    let t = build_app(None);

    // Missing chip_type is rejected
    let (status, body) = request(
        &t.app,
        Method::POST,
        "/tests",
        Some(json!({"name": "incomplete"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("chip_type"));

    // Create, read back, delete
    let (status, body) = request(
        &t.app,
        Method::POST,
        "/tests",
        Some(json!({
            "name": "smoke",
            "chip_type": "LDPC",
            "config": {"snr": 5},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = request(&t.app, Method::GET, &format!("/tests/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "smoke");
    assert_eq!(body["config"]["snr"], 5);
    assert_eq!(body["status"], "created");

    let (status, body) = request(&t.app, Method::GET, "/tests?chip_type=LDPC", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);

    let (status, _) = request(
        &t.app,
        Method::PUT,
        &format!("/tests/{id}"),
        Some(json!({"status": "completed"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(&t.app, Method::DELETE, &format!("/tests/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = request(&t.app, Method::GET, &format!("/tests/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn ldpc_job_validation_rejects_bad_ranges() {
    let t = build_app(None);

    for payload in [
        json!({"name": "t", "start_snr": 0, "end_snr": 5, "runs_per_snr": 1}),
        json!({"name": "t", "start_snr": 1, "end_snr": 11, "runs_per_snr": 1}),
        json!({"name": "t", "start_snr": 6, "end_snr": 5, "runs_per_snr": 1}),
        json!({"name": "t", "start_snr": 5, "end_snr": 6, "runs_per_snr": 11}),
    ] {
        let (status, body) = request(&t.app, Method::POST, "/ldpc/jobs", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());
    }
}

#[tokio::test]
async fn ldpc_job_without_hardware_runner_is_internal_error() {
    let t = build_app(None);
    let (status, body) = request(
        &t.app,
        Method::POST,
        "/ldpc/jobs",
        Some(json!({"name": "t", "start_snr": 5, "end_snr": 6, "runs_per_snr": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("HARDWARE_API_URL"));
}

struct FakeRunner;

impl SnrTestRunner for FakeRunner {
    fn health_check(&self) -> Result<HealthReport, JobError> {
        Ok(HealthReport {
            status: "healthy".into(),
            power: true,
            clock: true,
            memory: true,
            oscillators: true,
            raw_results: vec!["HEALTH_CHECK_COMPLETE:OK".into()],
        })
    }

    fn run_snr_test(&self, snr_db: i64, num_runs: u32) -> Result<SnrSummary, JobError> {
        let rows = (0..num_runs)
            .map(|i| DecodeRow {
                test_index: i as i64,
                snr_db,
                execution_time_us: 900,
                success: 1,
                ..Default::default()
            })
            .collect();
        SnrSummary::aggregate(snr_db, num_runs, rows).map_err(|e| JobError::Hardware(e.to_string()))
    }
}

#[tokio::test]
async fn ldpc_job_sweeps_every_snr_point() {
    let t = build_app(Some(Arc::new(FakeRunner)));

    let (status, body) = request(
        &t.app,
        Method::POST,
        "/ldpc/jobs",
        Some(json!({"name": "t", "start_snr": 5, "end_snr": 6, "runs_per_snr": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "completed");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, job) = request(&t.app, Method::GET, &format!("/ldpc/jobs/{job_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "completed");
    assert_eq!(job["progress"], 100.0);
    assert_eq!(job["results"]["5dB"]["total_vectors"], 2);
    assert_eq!(job["results"]["6dB"]["total_vectors"], 2);

    // Completed jobs appear in the summary dropdown
    let (_, summaries) = request(&t.app, Method::GET, "/ldpc/test-summaries", None).await;
    assert_eq!(summaries["summaries"][0]["id"], job_id.as_str());
}

#[tokio::test]
async fn sat_solve_runs_async_and_completes() {
    let t = build_app(None);

    let (status, body) = request(
        &t.app,
        Method::POST,
        "/sat/solve",
        Some(json!({
            "name": "simple",
            "dimacs": "p cnf 3 2\n1 2 0\n-1 3 0\n",
            "solver_type": "minisat",
            "enable_minisat": true,
            "iterations": 1,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "running");
    let test_id = body["test_id"].as_str().unwrap().to_string();

    // The worker runs in the background; poll for the terminal state
    let mut completed = Value::Null;
    for _ in 0..100 {
        let test = t.db.get_test(&test_id).unwrap();
        if test.status == "completed" {
            completed = serde_json::to_value(&test).unwrap();
            break;
        }
        assert_ne!(test.status, "failed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(completed["status"], "completed");
    let run = &completed["results"][0]["results"]["solver_results"]["minisat"][0];
    assert_eq!(run["satisfiable"], true);

    let (status, detail) = request(&t.app, Method::GET, &format!("/sat/tests/{test_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["chip_type"], "SAT");
    assert!(detail["results"].as_array().map_or(false, |r| !r.is_empty()));
}

#[tokio::test]
async fn sat_solve_validates_request_shape() {
    let t = build_app(None);

    let (status, _) = request(&t.app, Method::POST, "/sat/solve", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(
        &t.app,
        Method::POST,
        "/sat/solve",
        Some(json!({"name": "batch", "batch_mode": true})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("satlib_benchmark"));
}

#[tokio::test]
async fn announcements_crud() {
    let t = build_app(None);

    let (status, body) = request(
        &t.app,
        Method::POST,
        "/announcements",
        Some(json!({"message": "maintenance at noon", "type": "warning"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["id"].as_str().unwrap().to_string();

    let (_, listed) = request(&t.app, Method::GET, "/announcements", None).await;
    assert_eq!(listed["announcements"][0]["type"], "warning");

    let (status, _) =
        request(&t.app, Method::DELETE, &format!("/announcements/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) =
        request(&t.app, Method::DELETE, &format!("/announcements/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn auth_without_credential_is_rejected() {
    let t = build_app(None);
    let (status, body) = request(&t.app, Method::POST, "/auth/google", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("credential"));
}

#[tokio::test]
async fn cors_echoes_allowed_origin_only() {
    let t = build_app(None);
    let app = t.app.clone().layer(cors_layer(vec![
        "https://lab.example.edu".into(),
    ]));

    // Allow-listed origin is echoed back
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/health")
                .header(header::ORIGIN, "https://lab.example.edu")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://lab.example.edu"
    );
    assert_eq!(
        response.headers()["access-control-allow-credentials"],
        "true"
    );

    // Unknown origins get no CORS grant
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/health")
                .header(header::ORIGIN, "https://evil.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response
        .headers()
        .get("access-control-allow-origin")
        .is_none());

    // Preflight succeeds for the allow-listed origin
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/tests")
                .header(header::ORIGIN, "https://lab.example.edu")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://lab.example.edu"
    );
}

#[tokio::test]
async fn metrics_endpoints_store_and_query() {
    let t = build_app(None);

    let (status, body) = request(&t.app, Method::POST, "/system/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = request(&t.app, Method::GET, "/system/metrics?hours=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["metrics"].as_array().unwrap().len(), 1);
}
