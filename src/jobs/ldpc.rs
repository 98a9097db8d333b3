//! LDPC SNR sweep jobs
//!
//! A job walks the integer SNR range, drives one campaign per point, and
//! persists either the aggregate summary or the error under the `"<n>dB"`
//! key. The device side sits behind `SnrTestRunner`, so the data service
//! can drive the lab host over HTTP while tests substitute a fake.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::hardware::protocol::SnrSummary;
use crate::hardware::session::HealthReport;
use crate::storage::{Database, StorageError};

/// Result type shared by the orchestrators
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Hardware connection failed: {0}")]
    Hardware(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Capability to run SNR campaigns on the LDPC board
pub trait SnrTestRunner: Send + Sync {
    fn health_check(&self) -> Result<HealthReport, JobError>;
    fn run_snr_test(&self, snr_db: i64, num_runs: u32) -> Result<SnrSummary, JobError>;
}

/// Request body for creating an LDPC job
#[derive(Debug, Clone, Deserialize)]
pub struct LdpcJobRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_start_snr")]
    pub start_snr: i64,
    #[serde(default = "default_end_snr")]
    pub end_snr: i64,
    #[serde(default = "default_runs_per_snr")]
    pub runs_per_snr: u32,
}

fn default_start_snr() -> i64 {
    1
}

fn default_end_snr() -> i64 {
    10
}

fn default_runs_per_snr() -> u32 {
    1
}

impl LdpcJobRequest {
    pub fn validate(&self) -> Result<(), JobError> {
        if !(1..=10).contains(&self.start_snr) || !(1..=10).contains(&self.end_snr) {
            return Err(JobError::InvalidInput(
                "SNR must be between 1 and 10 dB".into(),
            ));
        }
        if self.start_snr > self.end_snr {
            return Err(JobError::InvalidInput(
                "Start SNR must be <= End SNR".into(),
            ));
        }
        if !(1..=10).contains(&self.runs_per_snr) {
            return Err(JobError::InvalidInput(
                "Runs per SNR must be between 1 and 10".into(),
            ));
        }
        Ok(())
    }
}

/// What job creation returns to the frontend
#[derive(Debug, Clone, Serialize)]
pub struct LdpcJobOutcome {
    pub job_id: String,
    pub status: String,
    pub summary: Value,
    pub message: String,
}

/// Validate, health-check, then sweep the SNR range.
///
/// Per-SNR failures are captured in the results map rather than failing
/// the job; a top-level failure marks the job failed before propagating.
pub fn run_ldpc_job(
    db: &Database,
    runner: &dyn SnrTestRunner,
    request: &LdpcJobRequest,
) -> Result<LdpcJobOutcome, JobError> {
    request.validate()?;

    let health = runner.health_check()?;
    if !health.is_healthy() {
        return Err(JobError::Hardware(format!(
            "health check failed: {}",
            health.status
        )));
    }

    let job_id = db.insert_ldpc_job(
        request
            .name
            .as_deref()
            .unwrap_or("LDPC hardware sweep"),
        "ldpc_hardware_test",
        &json!({
            "start_snr": request.start_snr,
            "end_snr": request.end_snr,
            "runs_per_snr": request.runs_per_snr,
            "hardware_type": "AMORGOS_LDPC",
        }),
        "running",
        &json!({ "health_check": health }),
    )?;

    match sweep(db, runner, request, &job_id, &health) {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            if let Err(db_err) = db.fail_ldpc_job(&job_id) {
                tracing::error!("Failed to mark job {} failed: {}", job_id, db_err);
            }
            Err(e)
        }
    }
}

fn sweep(
    db: &Database,
    runner: &dyn SnrTestRunner,
    request: &LdpcJobRequest,
    job_id: &str,
    health: &HealthReport,
) -> Result<LdpcJobOutcome, JobError> {
    let snr_points: Vec<i64> = (request.start_snr..=request.end_snr).collect();
    let total_steps = snr_points.len();
    let mut results = serde_json::Map::new();
    let mut summaries: Vec<SnrSummary> = Vec::new();

    for (idx, snr) in snr_points.iter().enumerate() {
        tracing::info!("Testing SNR {}dB ({}/{})", snr, idx + 1, total_steps);

        match runner.run_snr_test(*snr, request.runs_per_snr) {
            Ok(summary) => {
                results.insert(format!("{snr}dB"), serde_json::to_value(&summary).unwrap_or_default());
                summaries.push(summary);
            }
            Err(e) => {
                tracing::error!("Error at SNR {}dB: {}", snr, e);
                results.insert(format!("{snr}dB"), json!({ "error": e.to_string() }));
            }
        }

        let progress = ((idx + 1) as f64 / total_steps as f64) * 100.0;
        db.set_ldpc_progress(job_id, progress)?;
    }

    let metadata = job_metadata(request, &summaries, health);
    db.complete_ldpc_job(job_id, &Value::Object(results), &metadata)?;

    Ok(LdpcJobOutcome {
        job_id: job_id.to_string(),
        status: "completed".into(),
        summary: metadata,
        message: format!(
            "Hardware test completed: {}-{}dB",
            request.start_snr, request.end_snr
        ),
    })
}

fn job_metadata(request: &LdpcJobRequest, summaries: &[SnrSummary], health: &HealthReport) -> Value {
    let mut performance = serde_json::Map::new();
    if !summaries.is_empty() {
        let n = summaries.len() as f64;
        performance.insert(
            "convergence_rate".into(),
            json!(summaries.iter().map(|s| s.convergence_rate).sum::<f64>() / n),
        );
        performance.insert(
            "energy_efficiency_pj_per_bit".into(),
            json!(summaries.iter().map(|s| s.energy_efficiency_pj_per_bit).sum::<f64>() / n),
        );
        performance.insert(
            "avg_execution_time_us".into(),
            json!(summaries.iter().map(|s| s.avg_execution_time_us).sum::<f64>() / n),
        );
    }

    json!({
        "test_configuration": {
            "snr_range": format!("{}-{} dB", request.start_snr, request.end_snr),
            "runs_per_snr": request.runs_per_snr,
            "hardware": "AMORGOS 28nm CMOS",
            "code": "(96,48) LDPC",
        },
        "performance_summary": performance,
        "health_check": health,
    })
}

/// Drives the lab host's hardware service over HTTP.
///
/// Used by the data service, which has the database but no USB devices.
pub struct RemoteSnrRunner {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl RemoteSnrRunner {
    pub fn new(base_url: impl Into<String>) -> Result<Self, JobError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| JobError::Hardware(e.to_string()))?;
        Ok(RemoteSnrRunner {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl SnrTestRunner for RemoteSnrRunner {
    fn health_check(&self) -> Result<HealthReport, JobError> {
        let response = self
            .client
            .post(format!("{}/ldpc/command", self.base_url))
            .json(&json!({ "command": "HEALTH_CHECK" }))
            .send()
            .map_err(|e| JobError::Hardware(e.to_string()))?;

        let body: Value = response
            .json()
            .map_err(|e| JobError::Hardware(e.to_string()))?;
        if let Some(error) = body["error"].as_str() {
            return Err(JobError::Hardware(error.to_string()));
        }

        let output = body["output"].as_str().unwrap_or_default();
        let ok = output.contains("HEALTH_CHECK_COMPLETE:OK");
        Ok(HealthReport {
            status: if ok { "healthy".into() } else { "error".into() },
            power: output.contains("POWER_OK"),
            clock: output.contains("CLOCK_OK"),
            memory: output.contains("MEMORY_OK"),
            oscillators: output.contains("OSCILLATORS_OK"),
            raw_results: output.lines().map(str::to_string).collect(),
        })
    }

    fn run_snr_test(&self, snr_db: i64, num_runs: u32) -> Result<SnrSummary, JobError> {
        let response = self
            .client
            .post(format!("{}/ldpc/test", self.base_url))
            .json(&json!({ "snr_db": snr_db, "num_runs": num_runs }))
            .send()
            .map_err(|e| JobError::Hardware(e.to_string()))?;

        let body: Value = response
            .json()
            .map_err(|e| JobError::Hardware(e.to_string()))?;
        if body["success"].as_bool() != Some(true) {
            let message = body["error"].as_str().unwrap_or("hardware test failed");
            return Err(JobError::Hardware(message.to_string()));
        }

        serde_json::from_value(body["results"].clone())
            .map_err(|e| JobError::Hardware(format!("malformed hardware response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::protocol::DecodeRow;
    use parking_lot::Mutex;

    struct FakeRunner {
        healthy: bool,
        fail_at: Option<i64>,
        calls: Mutex<Vec<i64>>,
    }

    impl FakeRunner {
        fn healthy() -> Self {
            FakeRunner {
                healthy: true,
                fail_at: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl SnrTestRunner for FakeRunner {
        fn health_check(&self) -> Result<HealthReport, JobError> {
            Ok(HealthReport {
                status: if self.healthy { "healthy".into() } else { "error".into() },
                power: self.healthy,
                clock: self.healthy,
                memory: self.healthy,
                oscillators: self.healthy,
                raw_results: vec!["HEALTH_CHECK_COMPLETE:OK".into()],
            })
        }

        fn run_snr_test(&self, snr_db: i64, num_runs: u32) -> Result<SnrSummary, JobError> {
            self.calls.lock().push(snr_db);
            if self.fail_at == Some(snr_db) {
                return Err(JobError::Hardware("board went quiet".into()));
            }
            let rows = (0..num_runs)
                .map(|i| DecodeRow {
                    test_index: i as i64,
                    snr_db,
                    execution_time_us: 1000,
                    success: 1,
                    ..Default::default()
                })
                .collect();
            SnrSummary::aggregate(snr_db, num_runs, rows)
                .map_err(|e| JobError::Hardware(e.to_string()))
        }
    }

    fn scratch_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("jobs.db"));
        db.init_schema().unwrap();
        (dir, db)
    }

    fn request(start: i64, end: i64, runs: u32) -> LdpcJobRequest {
        LdpcJobRequest {
            name: Some("t".into()),
            start_snr: start,
            end_snr: end,
            runs_per_snr: runs,
        }
    }

    #[test]
    fn test_validation_bounds() {
        assert!(request(0, 5, 1).validate().is_err());
        assert!(request(1, 11, 1).validate().is_err());
        assert!(request(6, 5, 1).validate().is_err());
        assert!(request(5, 6, 0).validate().is_err());
        assert!(request(5, 6, 11).validate().is_err());
        assert!(request(5, 6, 2).validate().is_ok());
    }

    #[test]
    fn test_completed_job_has_all_snr_keys() {
        let (_dir, db) = scratch_db();
        let runner = FakeRunner::healthy();

        let outcome = run_ldpc_job(&db, &runner, &request(5, 6, 2)).unwrap();
        assert_eq!(outcome.status, "completed");

        let job = db.get_ldpc_job(&outcome.job_id).unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.results["5dB"]["total_vectors"], 2);
        assert_eq!(job.results["6dB"]["total_vectors"], 2);
        assert_eq!(*runner.calls.lock(), vec![5, 6]);
        // The boot-time health transcript survives job completion
        assert_eq!(job.metadata["health_check"]["status"], "healthy");
        assert_eq!(
            job.metadata["health_check"]["raw_results"][0],
            "HEALTH_CHECK_COMPLETE:OK"
        );
        assert_eq!(
            job.metadata["test_configuration"]["snr_range"],
            "5-6 dB"
        );
    }

    #[test]
    fn test_per_snr_error_is_captured_not_fatal() {
        let (_dir, db) = scratch_db();
        let runner = FakeRunner {
            fail_at: Some(6),
            ..FakeRunner::healthy()
        };

        let outcome = run_ldpc_job(&db, &runner, &request(5, 7, 1)).unwrap();
        let job = db.get_ldpc_job(&outcome.job_id).unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.results["5dB"]["total_vectors"], 1);
        assert!(job.results["6dB"]["error"]
            .as_str()
            .unwrap()
            .contains("board went quiet"));
        assert_eq!(job.results["7dB"]["total_vectors"], 1);
    }

    #[test]
    fn test_unhealthy_hardware_aborts_before_insert() {
        let (_dir, db) = scratch_db();
        let runner = FakeRunner {
            healthy: false,
            ..FakeRunner::healthy()
        };

        let err = run_ldpc_job(&db, &runner, &request(5, 6, 1)).unwrap_err();
        assert!(matches!(err, JobError::Hardware(_)));
        assert!(db.list_ldpc_jobs().unwrap().is_empty());
    }
}
