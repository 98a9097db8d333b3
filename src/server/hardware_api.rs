//! HTTP surface of the hardware service (lab host)
//!
//! Handlers bridge into the blocking hardware layer through
//! `spawn_blocking`; a session is only ever touched while its mutex is
//! held, so concurrent requests against one board serialize while
//! different boards proceed in parallel.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::DeviceType;
use crate::hardware::firmware::FirmwareDriver;
use crate::hardware::manager::DeviceManager;
use crate::hardware::pool::SessionPool;
use crate::hardware::session::COMMAND_TIMEOUT;
use crate::server::{ApiError, ApiResult};
use crate::storage::now_utc;

#[derive(Clone)]
pub struct HardwareState {
    pub manager: Arc<DeviceManager>,
    pub pool: Arc<SessionPool>,
    pub firmware: Arc<FirmwareDriver>,
    pub started: Instant,
}

impl HardwareState {
    pub fn new(manager: Arc<DeviceManager>) -> Self {
        let pool = Arc::new(SessionPool::new(manager.clone()));
        let firmware = Arc::new(FirmwareDriver::new(manager.clone()));
        HardwareState {
            manager,
            pool,
            firmware,
            started: Instant::now(),
        }
    }
}

pub fn router(state: HardwareState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/hardware/status", get(hardware_status))
        .route("/hardware/discover", post(discover))
        .route("/hardware/reset/:device", post(reset))
        .route("/hardware/gpio/status", get(gpio_status))
        .route("/firmware/build/:device", post(firmware_build))
        .route("/firmware/upload/:device", post(firmware_upload))
        .route("/firmware/flash/:device", post(firmware_flash))
        .route("/ldpc/command", post(ldpc_command))
        .route("/ldpc/deploy", post(ldpc_deploy))
        .route("/ldpc/serial-history", get(ldpc_serial_history))
        .route("/ldpc/test", post(ldpc_test))
        .route("/sat/command", post(sat_command))
        .route("/sat/serial-history", get(sat_serial_history))
        .route("/sat/solve", post(sat_solve))
        .route("/session-break", post(session_break))
        .with_state(state)
}

fn parse_device(device: &str) -> ApiResult<DeviceType> {
    DeviceType::from_str(device).map_err(ApiError::BadRequest)
}

async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ApiResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("hardware task failed: {e}")))?
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": "Dacroq Hardware API",
        "version": "2.0",
        "status": "operational",
        "endpoints": {
            "/health": "Service health check",
            "/hardware/discover": "Run device auto-discovery",
            "/hardware/status": "Registration and connection status",
            "/hardware/reset/<device>": "GPIO reset (or 'all')",
            "/hardware/gpio/status": "Reset line states",
            "/firmware/build/<device>": "Build firmware",
            "/firmware/upload/<device>": "Upload firmware",
            "/firmware/flash/<device>": "Build and upload firmware",
            "/ldpc/command": "Raw LDPC console command",
            "/ldpc/deploy": "Deploy SET_SNR configuration",
            "/ldpc/serial-history": "LDPC serial monitor",
            "/ldpc/test": "Run one SNR campaign",
            "/sat/command": "Raw SAT console command",
            "/sat/serial-history": "SAT serial monitor",
            "/sat/solve": "Run a hardware SAT campaign",
            "/session-break": "Insert a history separator",
        },
    }))
}

async fn health(State(state): State<HardwareState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": now_utc(),
        "uptime": state.started.elapsed().as_secs_f64(),
    }))
}

async fn hardware_status(State(state): State<HardwareState>) -> Json<Value> {
    Json(json!({
        "hardware_manager": state.manager.status(),
        "ldpc_connected": state.pool.is_connected(DeviceType::Ldpc),
        "sat_connected": state.pool.is_connected(DeviceType::Sat),
        "concurrent_support": true,
        "timestamp": now_utc(),
    }))
}

async fn discover(State(state): State<HardwareState>) -> ApiResult<Json<Value>> {
    let manager = state.manager.clone();
    let discovered = run_blocking(move || Ok(manager.discover_all())).await?;

    let as_map: serde_json::Map<String, Value> = discovered
        .iter()
        .map(|(device, port)| (device.to_string(), json!(port)))
        .collect();

    Ok(Json(json!({
        "discovered": as_map,
        "total_found": discovered.len(),
        "status": state.manager.status(),
        "timestamp": now_utc(),
    })))
}

async fn reset(State(state): State<HardwareState>, Path(device): Path<String>) -> Response {
    let manager = state.manager.clone();

    if device == "all" {
        let result = run_blocking(move || Ok(manager.reset_all()?)).await;
        return match result {
            Ok(outcomes) => {
                let devices_reset: Vec<String> =
                    outcomes.iter().map(|o| o.device.clone()).collect();
                let message =
                    format!("Hardware reset completed for {} devices", outcomes.len());
                Json(json!({
                    "success": true,
                    "devices_reset": devices_reset,
                    "details": outcomes,
                    "message": message,
                }))
                .into_response()
            }
            Err(e) => reset_failure(e),
        };
    }

    let target = match parse_device(&device) {
        Ok(target) => target,
        Err(e) => return e.into_response(),
    };
    let result = run_blocking(move || Ok(manager.reset_device(target)?)).await;
    match result {
        Ok(outcome) => Json(serde_json::to_value(outcome).unwrap_or_default()).into_response(),
        Err(e) => reset_failure(e),
    }
}

fn reset_failure(e: ApiError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": e.to_string() })),
    )
        .into_response()
}

async fn gpio_status(State(state): State<HardwareState>) -> Json<Value> {
    Json(state.manager.gpio().status())
}

#[derive(Debug, Default, Deserialize)]
struct UploadBody {
    port: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlashBody {
    port: Option<String>,
    #[serde(default = "default_build")]
    build: bool,
}

fn default_build() -> bool {
    true
}

async fn firmware_build(
    State(state): State<HardwareState>,
    Path(device): Path<String>,
) -> ApiResult<Json<Value>> {
    let device = parse_device(&device)?;
    let outcome = state.firmware.build(device).await?;
    Ok(Json(serde_json::to_value(outcome).unwrap_or_default()))
}

async fn firmware_upload(
    State(state): State<HardwareState>,
    Path(device): Path<String>,
    body: Option<Json<UploadBody>>,
) -> ApiResult<Json<Value>> {
    let device = parse_device(&device)?;
    let port = body.and_then(|Json(b)| b.port);
    let outcome = state.firmware.upload(device, port).await?;
    Ok(Json(serde_json::to_value(outcome).unwrap_or_default()))
}

async fn firmware_flash(
    State(state): State<HardwareState>,
    Path(device): Path<String>,
    body: Option<Json<FlashBody>>,
) -> ApiResult<Json<Value>> {
    let device = parse_device(&device)?;
    let (port, build) = match body {
        Some(Json(b)) => (b.port, b.build),
        None => (None, true),
    };
    let outcome = state.firmware.flash(device, port, build).await?;
    Ok(Json(serde_json::to_value(outcome).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    #[serde(default)]
    command: String,
}

async fn run_command(state: &HardwareState, device: DeviceType, command: String) -> ApiResult<String> {
    if command.trim().is_empty() {
        return Err(ApiError::BadRequest("command cannot be empty".into()));
    }
    let pool = state.pool.clone();
    run_blocking(move || {
        let session = pool.acquire(device)?;
        let output = session.lock().execute(command.trim(), COMMAND_TIMEOUT)?;
        Ok(output)
    })
    .await
}

async fn ldpc_command(
    State(state): State<HardwareState>,
    Json(body): Json<CommandBody>,
) -> ApiResult<Json<Value>> {
    let output = run_command(&state, DeviceType::Ldpc, body.command).await?;
    Ok(Json(json!({ "output": output })))
}

async fn sat_command(
    State(state): State<HardwareState>,
    Json(body): Json<CommandBody>,
) -> ApiResult<Json<Value>> {
    let output = run_command(&state, DeviceType::Sat, body.command).await?;
    Ok(Json(json!({ "output": output })))
}

#[derive(Debug, Deserialize)]
struct DeployBody {
    #[serde(default)]
    snr_runs: std::collections::BTreeMap<String, u32>,
}

/// Push one `SET_SNR` per configured point to the board console
async fn ldpc_deploy(
    State(state): State<HardwareState>,
    Json(body): Json<DeployBody>,
) -> ApiResult<Json<Value>> {
    if body.snr_runs.is_empty() {
        return Err(ApiError::BadRequest("snr_runs cannot be empty".into()));
    }

    let pool = state.pool.clone();
    let started = now_utc();
    let log = run_blocking(move || {
        let session = pool.acquire(DeviceType::Ldpc)?;
        let mut session = session.lock();
        let mut log = Vec::new();
        for snr in body.snr_runs.keys() {
            let command = format!("SET_SNR:{}", snr.trim_end_matches("dB"));
            let response = session.execute(&command, COMMAND_TIMEOUT)?;
            log.push(format!("Command: {command}"));
            log.push(format!("Response: {response}"));
        }
        Ok(log)
    })
    .await?;

    Ok(Json(json!({
        "status": "success",
        "started": started,
        "completed": now_utc(),
        "log": log,
    })))
}

/// History is served through the pool so the first UI request also
/// establishes the session; failures degrade to an empty console.
async fn serial_history(state: &HardwareState, device: DeviceType) -> Response {
    let pool = state.pool.clone();
    let result = run_blocking(move || {
        let session = pool.acquire(device)?;
        let session = session.lock();
        Ok(json!({
            "history": session.history().formatted(),
            "connected": session.is_connected(),
            "last_heartbeat": session.last_heartbeat_unix(),
        }))
    })
    .await;

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "history": [],
                "connected": false,
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn ldpc_serial_history(State(state): State<HardwareState>) -> Response {
    serial_history(&state, DeviceType::Ldpc).await
}

async fn sat_serial_history(State(state): State<HardwareState>) -> Response {
    serial_history(&state, DeviceType::Sat).await
}

#[derive(Debug, Deserialize)]
struct SnrTestBody {
    #[serde(default = "default_snr")]
    snr_db: i64,
    #[serde(default = "default_runs")]
    num_runs: u32,
}

fn default_snr() -> i64 {
    5
}

fn default_runs() -> u32 {
    1
}

async fn ldpc_test(
    State(state): State<HardwareState>,
    Json(body): Json<SnrTestBody>,
) -> Response {
    let pool = state.pool.clone();
    let result = run_blocking(move || {
        let session = pool.acquire(DeviceType::Ldpc)?;
        let summary = session.lock().run_snr_test(body.snr_db, body.num_runs)?;
        Ok(summary)
    })
    .await;

    match result {
        Ok(summary) => Json(json!({ "success": true, "results": summary })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct HardwareSatBody {
    #[serde(default)]
    dimacs: String,
    #[serde(default = "default_runs")]
    problem_count: u32,
}

async fn sat_solve(
    State(state): State<HardwareState>,
    Json(body): Json<HardwareSatBody>,
) -> Response {
    if body.dimacs.trim().is_empty() {
        return ApiError::BadRequest("DIMACS CNF required".into()).into_response();
    }

    let pool = state.pool.clone();
    let result = run_blocking(move || {
        let session = pool.acquire(DeviceType::Sat)?;
        let summary = session
            .lock()
            .solve_sat_problem(&body.dimacs, body.problem_count)?;
        Ok(summary)
    })
    .await;

    match result {
        Ok(summary) => Json(json!({ "success": true, "results": summary })).into_response(),
        Err(e @ ApiError::BadRequest(_)) => e.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct SessionBreakBody {
    #[serde(default = "default_separator")]
    text: String,
}

fn default_separator() -> String {
    "SESSION BREAK".into()
}

async fn session_break(
    State(state): State<HardwareState>,
    body: Option<Json<SessionBreakBody>>,
) -> ApiResult<Json<Value>> {
    let text = body
        .map(|Json(b)| b.text)
        .unwrap_or_else(default_separator);

    let pool = state.pool.clone();
    let separator = text.clone();
    // A session mutex may be held by a long campaign; don't block the
    // async workers waiting on it
    let results = run_blocking(move || {
        let mut results = serde_json::Map::new();
        for device in [DeviceType::Ldpc, DeviceType::Sat, DeviceType::Ksat] {
            let status = match pool.peek(device) {
                Some(session) => {
                    let session = session.lock();
                    if session.is_connected() {
                        session.add_session_separator(&separator);
                        "Session separator added"
                    } else {
                        "No active connection"
                    }
                }
                None => "No active connection",
            };
            results.insert(device.to_string(), json!(status));
        }
        Ok(results)
    })
    .await?;

    Ok(Json(json!({
        "success": true,
        "results": results,
        "separator_text": text,
    })))
}
