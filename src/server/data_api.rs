//! HTTP surface of the data service (web host)
//!
//! Owns the database: tests, LDPC jobs, SAT campaigns, auth, metrics, and
//! announcements. LDPC jobs drive the lab host through the injected
//! `SnrTestRunner`; everything else is local.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth;
use crate::config::ServiceConfig;
use crate::jobs::ldpc::{run_ldpc_job, LdpcJobRequest};
use crate::jobs::sat::{spawn_sat_worker, SatSolveRequest};
use crate::jobs::SnrTestRunner;
use crate::metrics;
use crate::server::{ApiError, ApiResult};
use crate::storage::{
    now_utc, Database, LdpcJobUpdate, NewAnnouncement, NewTest, TestFilter, TestUpdate,
};

#[derive(Clone)]
pub struct DataState {
    pub db: Database,
    pub config: Arc<ServiceConfig>,
    pub http: reqwest::Client,
    pub snr_runner: Option<Arc<dyn SnrTestRunner>>,
    pub started: Instant,
}

impl DataState {
    pub fn new(
        db: Database,
        config: Arc<ServiceConfig>,
        snr_runner: Option<Arc<dyn SnrTestRunner>>,
    ) -> Self {
        DataState {
            db,
            config,
            http: reqwest::Client::new(),
            snr_runner,
            started: Instant::now(),
        }
    }
}

pub fn router(state: DataState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/auth/google", axum::routing::post(google_auth))
        .route("/tests", get(list_tests).post(create_test))
        .route(
            "/tests/:id",
            get(get_test).put(update_test).delete(delete_test),
        )
        .route("/ldpc/jobs", get(list_ldpc_jobs).post(create_ldpc_job))
        .route(
            "/ldpc/jobs/:id",
            get(get_ldpc_job).put(update_ldpc_job).delete(delete_ldpc_job),
        )
        .route("/ldpc/test-summaries", get(ldpc_test_summaries))
        .route("/sat/tests", get(list_sat_tests))
        .route("/sat/tests/:id", get(get_sat_test))
        .route("/sat/test-summaries", get(sat_test_summaries))
        .route("/sat/solve", axum::routing::post(sat_solve))
        .route(
            "/system/metrics",
            get(get_metrics).post(collect_metrics),
        )
        .route(
            "/announcements",
            get(list_announcements).post(create_announcement),
        )
        .route("/announcements/:id", axum::routing::delete(delete_announcement))
        .with_state(state)
}

async fn run_db<T, F>(db: &Database, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> ApiResult<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| ApiError::Internal(format!("database task failed: {e}")))?
}

async fn index() -> Json<Value> {
    Json(json!({
        "name": "Dacroq API",
        "version": "2.0",
        "status": "operational",
        "endpoints": {
            "/health": "System health check",
            "/auth/google": "Google sign-in",
            "/tests": "Test management",
            "/ldpc/jobs": "LDPC job management",
            "/ldpc/test-summaries": "Completed-test summaries",
            "/sat/solve": "SAT solver campaigns",
            "/sat/tests": "SAT test management",
            "/sat/test-summaries": "SAT test summaries",
            "/system/metrics": "System metrics",
            "/announcements": "System announcements",
        },
    }))
}

async fn health(State(state): State<DataState>) -> Response {
    let ping = run_db(&state.db, |db| Ok(db.ping()?)).await;
    match ping {
        Ok(()) => Json(json!({
            "status": "healthy",
            "timestamp": now_utc(),
            "uptime": state.started.elapsed().as_secs_f64(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "unhealthy", "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ---- auth ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AuthBody {
    credential: Option<String>,
    token: Option<String>,
}

async fn google_auth(
    State(state): State<DataState>,
    Json(body): Json<AuthBody>,
) -> ApiResult<Json<Value>> {
    let token = body
        .credential
        .or(body.token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No credential provided".into()))?;

    let client_id = state
        .config
        .google_client_id
        .clone()
        .ok_or_else(|| ApiError::Internal("Server configuration error".into()))?;

    let user = auth::authenticate(
        &state.http,
        &state.db,
        &token,
        &client_id,
        state.config.dev_mode,
    )
    .await?;

    Ok(Json(json!({ "success": true, "user": user })))
}

// ---- tests ---------------------------------------------------------------

async fn list_tests(
    State(state): State<DataState>,
    Query(filter): Query<TestFilter>,
) -> ApiResult<Json<Value>> {
    let limit = filter.limit.unwrap_or(50);
    let offset = filter.offset.unwrap_or(0);
    let (tests, total) = run_db(&state.db, move |db| Ok(db.list_tests(&filter)?)).await?;
    Ok(Json(json!({
        "tests": tests,
        "total_count": total,
        "limit": limit,
        "offset": offset,
    })))
}

async fn create_test(
    State(state): State<DataState>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    if body["name"].as_str().unwrap_or("").is_empty()
        || body["chip_type"].as_str().unwrap_or("").is_empty()
    {
        return Err(ApiError::BadRequest(
            "Missing required fields: name, chip_type".into(),
        ));
    }
    let new: NewTest = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid test payload: {e}")))?;

    let id = run_db(&state.db, move |db| Ok(db.insert_test(&new, "created")?)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": id, "message": "Test created successfully" })),
    )
        .into_response())
}

async fn get_test(
    State(state): State<DataState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let test = run_db(&state.db, move |db| Ok(db.get_test(&id)?)).await?;
    Ok(Json(serde_json::to_value(test).unwrap_or_default()))
}

async fn update_test(
    State(state): State<DataState>,
    Path(id): Path<String>,
    Json(update): Json<TestUpdate>,
) -> ApiResult<Json<Value>> {
    run_db(&state.db, move |db| Ok(db.update_test(&id, &update)?)).await?;
    Ok(Json(json!({ "message": "Test updated successfully" })))
}

async fn delete_test(
    State(state): State<DataState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    run_db(&state.db, move |db| Ok(db.delete_test(&id)?)).await?;
    Ok(Json(json!({ "message": "Test deleted successfully" })))
}

// ---- ldpc jobs -----------------------------------------------------------

async fn list_ldpc_jobs(State(state): State<DataState>) -> ApiResult<Json<Value>> {
    let jobs = run_db(&state.db, |db| Ok(db.list_ldpc_jobs()?)).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

/// Synchronous sweep: validates, health-checks the board, then drives one
/// campaign per SNR point before responding.
async fn create_ldpc_job(
    State(state): State<DataState>,
    Json(request): Json<LdpcJobRequest>,
) -> ApiResult<Response> {
    request.validate().map_err(ApiError::from)?;

    let runner = state.snr_runner.clone().ok_or_else(|| {
        ApiError::Internal(
            "Hardware service not configured; set HARDWARE_API_URL to enable LDPC jobs".into(),
        )
    })?;

    let db = state.db.clone();
    let outcome = tokio::task::spawn_blocking(move || run_ldpc_job(&db, runner.as_ref(), &request))
        .await
        .map_err(|e| ApiError::Internal(format!("job task failed: {e}")))??;

    Ok((StatusCode::CREATED, Json(serde_json::to_value(outcome).unwrap_or_default()))
        .into_response())
}

async fn get_ldpc_job(
    State(state): State<DataState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let job = run_db(&state.db, move |db| Ok(db.get_ldpc_job(&id)?)).await?;
    Ok(Json(serde_json::to_value(job).unwrap_or_default()))
}

async fn update_ldpc_job(
    State(state): State<DataState>,
    Path(id): Path<String>,
    Json(update): Json<LdpcJobUpdate>,
) -> ApiResult<Json<Value>> {
    run_db(&state.db, move |db| Ok(db.update_ldpc_job(&id, &update)?)).await?;
    Ok(Json(json!({ "message": "Job updated successfully" })))
}

async fn delete_ldpc_job(
    State(state): State<DataState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    run_db(&state.db, move |db| Ok(db.delete_ldpc_job(&id)?)).await?;
    Ok(Json(json!({ "message": "Job deleted successfully" })))
}

async fn ldpc_test_summaries(State(state): State<DataState>) -> ApiResult<Json<Value>> {
    let summaries = run_db(&state.db, |db| Ok(db.test_summaries()?)).await?;
    Ok(Json(json!({ "summaries": summaries })))
}

// ---- sat -----------------------------------------------------------------

async fn list_sat_tests(State(state): State<DataState>) -> ApiResult<Json<Value>> {
    let (tests, _) = run_db(&state.db, |db| {
        Ok(db.list_tests(&TestFilter {
            chip_type: Some("SAT".into()),
            ..Default::default()
        })?)
    })
    .await?;
    Ok(Json(json!({ "tests": tests })))
}

async fn get_sat_test(
    State(state): State<DataState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let test = run_db(&state.db, move |db| Ok(db.get_test_by_chip(&id, "SAT")?)).await?;
    Ok(Json(serde_json::to_value(test).unwrap_or_default()))
}

async fn sat_test_summaries(State(state): State<DataState>) -> ApiResult<Json<Value>> {
    let (tests, _) = run_db(&state.db, |db| {
        Ok(db.list_tests(&TestFilter {
            chip_type: Some("SAT".into()),
            status: Some("completed".into()),
            ..Default::default()
        })?)
    })
    .await?;

    let summaries: Vec<Value> = tests
        .into_iter()
        .map(|test| {
            json!({
                "id": test.id,
                "name": test.name,
                "type": "SAT",
                "solver": test.metadata["solver"].as_str().unwrap_or("unknown"),
                "created": test.created,
                "satisfiable": test.metadata["satisfiable"],
                "solve_time": test.metadata["solve_time_ms"],
            })
        })
        .collect();

    Ok(Json(json!({ "summaries": summaries })))
}

/// Persist a `running` test and hand the campaign to the background
/// worker; the response returns immediately with the test id.
async fn sat_solve(
    State(state): State<DataState>,
    Json(request): Json<SatSolveRequest>,
) -> ApiResult<Response> {
    request.validate().map_err(ApiError::from)?;

    let total_problems = request.problem_count();
    let mut config = json!({
        "solver_type": request.solver_type.as_deref().unwrap_or("minisat"),
        "input_mode": request.input_mode.as_deref().unwrap_or("custom"),
        "algorithms": {
            "minisat": request.enable_minisat,
            "walksat": request.enable_walksat,
            "daedalus": request.enable_daedalus,
        },
        "iterations": request.iterations,
    });
    if request.batch_mode {
        config["batch_mode"] = json!(true);
        config["satlib_benchmark"] = json!(request.satlib_benchmark.clone());
        config["problem_indices"] = json!(request.problem_indices.clone());
    } else {
        config["dimacs"] = json!(request.dimacs.clone());
    }

    let new = NewTest {
        name: request.name.clone().unwrap_or_default(),
        chip_type: "SAT".into(),
        test_mode: Some(if request.batch_mode {
            "batch_solve".into()
        } else {
            "single_solve".into()
        }),
        environment: Some("lab".into()),
        config,
        metadata: json!({
            "solver": request.solver_type.as_deref().unwrap_or("minisat"),
            "total_iterations": request.iterations,
            "batch_mode": request.batch_mode,
            "problem_count": total_problems,
            "progress_percent": 0,
            "problems_completed": 0,
            "total_problems": total_problems,
        }),
    };

    let test_id = run_db(&state.db, move |db| Ok(db.insert_test(&new, "running")?)).await?;

    spawn_sat_worker(state.db.clone(), test_id.clone(), request.clone());

    let kind = if request.batch_mode {
        format!("batch ({total_problems} problems)")
    } else {
        "single problem".to_string()
    };
    tracing::info!("Test {} started asynchronously: {}", test_id, kind);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "test_id": test_id,
            "status": "running",
            "message": format!(
                "SAT test started: {kind}, {} iterations each",
                request.iterations
            ),
        })),
    )
        .into_response())
}

// ---- metrics -------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    #[serde(default = "default_hours")]
    hours: i64,
}

fn default_hours() -> i64 {
    24
}

async fn get_metrics(
    State(state): State<DataState>,
    Query(query): Query<MetricsQuery>,
) -> ApiResult<Json<Value>> {
    let rows = run_db(&state.db, move |db| Ok(db.recent_metrics(query.hours)?)).await?;
    Ok(Json(json!({ "metrics": rows })))
}

async fn collect_metrics(State(state): State<DataState>) -> ApiResult<Json<Value>> {
    let id = run_db(&state.db, |db| Ok(metrics::collect_and_store(db)?)).await?;
    Ok(Json(json!({ "success": true, "id": id })))
}

// ---- announcements -------------------------------------------------------

async fn list_announcements(State(state): State<DataState>) -> ApiResult<Json<Value>> {
    let rows = run_db(&state.db, |db| Ok(db.list_announcements()?)).await?;
    Ok(Json(json!({ "announcements": rows })))
}

async fn create_announcement(
    State(state): State<DataState>,
    Json(new): Json<NewAnnouncement>,
) -> ApiResult<Response> {
    if new.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message cannot be empty".into()));
    }
    let id = run_db(&state.db, move |db| Ok(db.insert_announcement(&new)?)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": id, "message": "Announcement created" })),
    )
        .into_response())
}

async fn delete_announcement(
    State(state): State<DataState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    run_db(&state.db, move |db| Ok(db.delete_announcement(&id)?)).await?;
    Ok(Json(json!({ "message": "Announcement deleted" })))
}
