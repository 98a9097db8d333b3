//! Embedded relational store for tests, jobs, users, and metrics
//!
//! Every operation opens a fresh connection, applies the WAL/busy-timeout/
//! foreign-key pragmas, executes, and closes; no connection outlives its
//! call. SQLite's own locking handles cross-process concurrency.

pub mod records;

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

pub use records::*;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Current UTC timestamp in the persisted RFC3339 format
pub fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Fresh record id
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn encode_json(value: &Value) -> String {
    // Absent JSON payloads persist as an empty object, not SQL-visible null
    if value.is_null() {
        "{}".into()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Database {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn open(&self) -> StorageResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Create the schema if it does not exist
    pub fn init_schema(&self) -> StorageResult<()> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                created_at TEXT NOT NULL,
                last_login TEXT,
                google_sub TEXT UNIQUE
            );

            CREATE TABLE IF NOT EXISTS tests (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                chip_type TEXT NOT NULL,
                test_mode TEXT,
                environment TEXT,
                config TEXT,
                status TEXT NOT NULL,
                created TEXT NOT NULL,
                metadata TEXT
            );

            CREATE TABLE IF NOT EXISTS test_results (
                id TEXT PRIMARY KEY,
                test_id TEXT NOT NULL,
                iteration INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                results TEXT,
                FOREIGN KEY (test_id) REFERENCES tests(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS ldpc_jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                job_type TEXT NOT NULL,
                config TEXT NOT NULL,
                status TEXT NOT NULL,
                created TEXT NOT NULL,
                started TEXT,
                completed TEXT,
                results TEXT,
                progress REAL DEFAULT 0,
                metadata TEXT
            );

            CREATE TABLE IF NOT EXISTS system_metrics (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                cpu_percent REAL,
                memory_percent REAL,
                disk_percent REAL,
                temperature REAL
            );

            CREATE TABLE IF NOT EXISTS announcements (
                id TEXT PRIMARY KEY,
                message TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'info',
                expires_at TEXT,
                created_at TEXT NOT NULL,
                created_by TEXT NOT NULL,
                active BOOLEAN DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_users_google_sub ON users(google_sub);
            CREATE INDEX IF NOT EXISTS idx_tests_created ON tests(created);
            CREATE INDEX IF NOT EXISTS idx_ldpc_jobs_created ON ldpc_jobs(created);
            "#,
        )?;
        Ok(())
    }

    /// Cheap liveness probe for health endpoints
    pub fn ping(&self) -> StorageResult<()> {
        let conn = self.open()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // ---- tests -----------------------------------------------------------

    fn test_from_row(row: &Row<'_>) -> rusqlite::Result<TestRecord> {
        Ok(TestRecord {
            id: row.get("id")?,
            name: row.get("name")?,
            chip_type: row.get("chip_type")?,
            test_mode: row.get("test_mode")?,
            environment: row.get("environment")?,
            config: parse_json_column(row.get("config")?),
            status: row.get("status")?,
            created: row.get("created")?,
            metadata: parse_json_column(row.get("metadata")?),
            results: Vec::new(),
        })
    }

    pub fn insert_test(&self, new: &NewTest, status: &str) -> StorageResult<String> {
        let id = generate_id();
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO tests (id, name, chip_type, test_mode, environment, config, status, created, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                new.name,
                new.chip_type,
                new.test_mode.as_deref().unwrap_or("standard"),
                new.environment.as_deref().unwrap_or("lab"),
                encode_json(&new.config),
                status,
                now_utc(),
                encode_json(&new.metadata),
            ],
        )?;
        Ok(id)
    }

    pub fn list_tests(&self, filter: &TestFilter) -> StorageResult<(Vec<TestRecord>, i64)> {
        let conn = self.open()?;

        let mut conditions = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(chip_type) = &filter.chip_type {
            conditions.push("chip_type = ?");
            args.push(chip_type.clone());
        }
        if let Some(status) = &filter.status {
            conditions.push("status = ?");
            args.push(status.clone());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM tests{where_clause}"),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let limit = filter.limit.unwrap_or(50);
        let offset = filter.offset.unwrap_or(0);
        let query = format!(
            "SELECT * FROM tests{where_clause} ORDER BY created DESC LIMIT {limit} OFFSET {offset}"
        );
        let mut stmt = conn.prepare(&query)?;
        let tests = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), Self::test_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((tests, count))
    }

    /// Fetch one test with its result rows attached
    pub fn get_test(&self, id: &str) -> StorageResult<TestRecord> {
        let conn = self.open()?;
        let mut test = conn
            .query_row("SELECT * FROM tests WHERE id = ?1", params![id], Self::test_from_row)
            .optional()?
            .ok_or(StorageError::NotFound)?;
        test.results = self.results_for_test_on(&conn, id)?;
        Ok(test)
    }

    pub fn get_test_by_chip(&self, id: &str, chip_type: &str) -> StorageResult<TestRecord> {
        let conn = self.open()?;
        let mut test = conn
            .query_row(
                "SELECT * FROM tests WHERE id = ?1 AND chip_type = ?2",
                params![id, chip_type],
                Self::test_from_row,
            )
            .optional()?
            .ok_or(StorageError::NotFound)?;
        test.results = self.results_for_test_on(&conn, id)?;
        Ok(test)
    }

    pub fn update_test(&self, id: &str, update: &TestUpdate) -> StorageResult<()> {
        let conn = self.open()?;
        let existing = conn
            .query_row("SELECT * FROM tests WHERE id = ?1", params![id], Self::test_from_row)
            .optional()?
            .ok_or(StorageError::NotFound)?;

        conn.execute(
            "UPDATE tests SET name = ?1, status = ?2, config = ?3, metadata = ?4 WHERE id = ?5",
            params![
                update.name.as_ref().unwrap_or(&existing.name),
                update.status.as_ref().unwrap_or(&existing.status),
                encode_json(update.config.as_ref().unwrap_or(&existing.config)),
                encode_json(update.metadata.as_ref().unwrap_or(&existing.metadata)),
                id,
            ],
        )?;
        Ok(())
    }

    pub fn set_test_status(&self, id: &str, status: &str) -> StorageResult<()> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE tests SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    /// Merge keys into a test's metadata object
    pub fn merge_test_metadata(&self, id: &str, patch: &Value) -> StorageResult<()> {
        let conn = self.open()?;
        let raw: Option<String> = conn
            .query_row("SELECT metadata FROM tests WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(StorageError::NotFound)?;

        let mut metadata = parse_json_column(raw);
        if let (Value::Object(base), Value::Object(patch)) = (&mut metadata, patch) {
            for (key, value) in patch {
                base.insert(key.clone(), value.clone());
            }
        }
        conn.execute(
            "UPDATE tests SET metadata = ?1 WHERE id = ?2",
            params![encode_json(&metadata), id],
        )?;
        Ok(())
    }

    pub fn delete_test(&self, id: &str) -> StorageResult<()> {
        let conn = self.open()?;
        let changed = conn.execute("DELETE FROM tests WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    // ---- test results ----------------------------------------------------

    pub fn insert_test_result(
        &self,
        test_id: &str,
        iteration: i64,
        results: &Value,
    ) -> StorageResult<String> {
        let id = generate_id();
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO test_results (id, test_id, iteration, timestamp, results)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, test_id, iteration, now_utc(), encode_json(results)],
        )?;
        Ok(id)
    }

    fn results_for_test_on(
        &self,
        conn: &Connection,
        test_id: &str,
    ) -> StorageResult<Vec<TestResultRecord>> {
        let mut stmt = conn
            .prepare("SELECT * FROM test_results WHERE test_id = ?1 ORDER BY timestamp DESC")?;
        let rows = stmt
            .query_map(params![test_id], |row| {
                Ok(TestResultRecord {
                    id: row.get("id")?,
                    test_id: row.get("test_id")?,
                    iteration: row.get("iteration")?,
                    timestamp: row.get("timestamp")?,
                    results: parse_json_column(row.get("results")?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn results_for_test(&self, test_id: &str) -> StorageResult<Vec<TestResultRecord>> {
        let conn = self.open()?;
        self.results_for_test_on(&conn, test_id)
    }

    // ---- ldpc jobs -------------------------------------------------------

    fn job_from_row(row: &Row<'_>) -> rusqlite::Result<LdpcJobRecord> {
        Ok(LdpcJobRecord {
            id: row.get("id")?,
            name: row.get("name")?,
            job_type: row.get("job_type")?,
            config: parse_json_column(row.get("config")?),
            status: row.get("status")?,
            created: row.get("created")?,
            started: row.get("started")?,
            completed: row.get("completed")?,
            results: parse_json_column(row.get("results")?),
            progress: row.get::<_, Option<f64>>("progress")?.unwrap_or(0.0),
            metadata: parse_json_column(row.get("metadata")?),
        })
    }

    pub fn insert_ldpc_job(
        &self,
        name: &str,
        job_type: &str,
        config: &Value,
        status: &str,
        metadata: &Value,
    ) -> StorageResult<String> {
        let id = generate_id();
        let conn = self.open()?;
        let now = now_utc();
        let started = if status == "running" { Some(now.clone()) } else { None };
        conn.execute(
            "INSERT INTO ldpc_jobs (id, name, job_type, config, status, created, started, progress, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            params![
                id,
                name,
                job_type,
                encode_json(config),
                status,
                now,
                started,
                encode_json(metadata),
            ],
        )?;
        Ok(id)
    }

    pub fn list_ldpc_jobs(&self) -> StorageResult<Vec<LdpcJobRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM ldpc_jobs ORDER BY created DESC")?;
        let jobs = stmt
            .query_map([], Self::job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn get_ldpc_job(&self, id: &str) -> StorageResult<LdpcJobRecord> {
        let conn = self.open()?;
        conn.query_row("SELECT * FROM ldpc_jobs WHERE id = ?1", params![id], Self::job_from_row)
            .optional()?
            .ok_or(StorageError::NotFound)
    }

    pub fn set_ldpc_progress(&self, id: &str, progress: f64) -> StorageResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE ldpc_jobs SET progress = ?1 WHERE id = ?2",
            params![progress, id],
        )?;
        Ok(())
    }

    /// Terminal success: progress pinned to 100, completion stamped
    pub fn complete_ldpc_job(
        &self,
        id: &str,
        results: &Value,
        metadata: &Value,
    ) -> StorageResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE ldpc_jobs SET status = 'completed', completed = ?1, results = ?2, progress = 100.0, metadata = ?3
             WHERE id = ?4",
            params![now_utc(), encode_json(results), encode_json(metadata), id],
        )?;
        Ok(())
    }

    /// Terminal failure: completion stamped, progress left as-is
    pub fn fail_ldpc_job(&self, id: &str) -> StorageResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE ldpc_jobs SET status = 'failed', completed = ?1 WHERE id = ?2",
            params![now_utc(), id],
        )?;
        Ok(())
    }

    pub fn update_ldpc_job(&self, id: &str, update: &LdpcJobUpdate) -> StorageResult<()> {
        let conn = self.open()?;
        let existing = conn
            .query_row("SELECT * FROM ldpc_jobs WHERE id = ?1", params![id], Self::job_from_row)
            .optional()?
            .ok_or(StorageError::NotFound)?;

        conn.execute(
            "UPDATE ldpc_jobs SET name = ?1, status = ?2, config = ?3, metadata = ?4 WHERE id = ?5",
            params![
                update.name.as_ref().unwrap_or(&existing.name),
                update.status.as_ref().unwrap_or(&existing.status),
                encode_json(update.config.as_ref().unwrap_or(&existing.config)),
                encode_json(update.metadata.as_ref().unwrap_or(&existing.metadata)),
                id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_ldpc_job(&self, id: &str) -> StorageResult<()> {
        let conn = self.open()?;
        let changed = conn.execute("DELETE FROM ldpc_jobs WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    // ---- users -----------------------------------------------------------

    fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
        Ok(UserRecord {
            id: row.get("id")?,
            email: row.get("email")?,
            name: row.get("name")?,
            role: row.get("role")?,
            created_at: row.get("created_at")?,
            last_login: row.get("last_login")?,
        })
    }

    /// Match by external subject or email; update `last_login` on match,
    /// insert a fresh `user`-role row otherwise
    pub fn upsert_google_user(
        &self,
        google_sub: &str,
        email: &str,
        name: &str,
    ) -> StorageResult<UserRecord> {
        let conn = self.open()?;
        let existing = conn
            .query_row(
                "SELECT * FROM users WHERE google_sub = ?1 OR email = ?2",
                params![google_sub, email],
                Self::user_from_row,
            )
            .optional()?;

        match existing {
            Some(user) => {
                conn.execute(
                    "UPDATE users SET last_login = ?1 WHERE id = ?2",
                    params![now_utc(), user.id],
                )?;
                Ok(UserRecord {
                    last_login: Some(now_utc()),
                    ..user
                })
            }
            None => {
                let id = generate_id();
                let now = now_utc();
                conn.execute(
                    "INSERT INTO users (id, email, name, role, created_at, last_login, google_sub)
                     VALUES (?1, ?2, ?3, 'user', ?4, ?5, ?6)",
                    params![id, email, name, now, now, google_sub],
                )?;
                Ok(UserRecord {
                    id,
                    email: email.to_string(),
                    name: name.to_string(),
                    role: "user".into(),
                    created_at: now.clone(),
                    last_login: Some(now),
                })
            }
        }
    }

    // ---- system metrics --------------------------------------------------

    pub fn insert_metric(
        &self,
        cpu_percent: Option<f64>,
        memory_percent: Option<f64>,
        disk_percent: Option<f64>,
        temperature: Option<f64>,
    ) -> StorageResult<String> {
        let id = generate_id();
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO system_metrics (id, timestamp, cpu_percent, memory_percent, disk_percent, temperature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, now_utc(), cpu_percent, memory_percent, disk_percent, temperature],
        )?;
        Ok(id)
    }

    pub fn recent_metrics(&self, hours: i64) -> StorageResult<Vec<SystemMetricRecord>> {
        let conn = self.open()?;
        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT * FROM system_metrics WHERE timestamp >= ?1 ORDER BY timestamp DESC",
        )?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok(SystemMetricRecord {
                    id: row.get("id")?,
                    timestamp: row.get("timestamp")?,
                    cpu_percent: row.get("cpu_percent")?,
                    memory_percent: row.get("memory_percent")?,
                    disk_percent: row.get("disk_percent")?,
                    temperature: row.get("temperature")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- announcements ---------------------------------------------------

    pub fn insert_announcement(&self, new: &NewAnnouncement) -> StorageResult<String> {
        let id = generate_id();
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO announcements (id, message, type, expires_at, created_at, created_by, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            params![
                id,
                new.message,
                new.kind,
                new.expires_at,
                now_utc(),
                new.created_by.as_deref().unwrap_or("system"),
            ],
        )?;
        Ok(id)
    }

    pub fn list_announcements(&self) -> StorageResult<Vec<AnnouncementRecord>> {
        let conn = self.open()?;
        let mut stmt =
            conn.prepare("SELECT * FROM announcements WHERE active = 1 ORDER BY created_at DESC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AnnouncementRecord {
                    id: row.get("id")?,
                    message: row.get("message")?,
                    kind: row.get("type")?,
                    expires_at: row.get("expires_at")?,
                    created_at: row.get("created_at")?,
                    created_by: row.get("created_by")?,
                    active: row.get("active")?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_announcement(&self, id: &str) -> StorageResult<()> {
        let conn = self.open()?;
        let changed = conn.execute("DELETE FROM announcements WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    // ---- summaries -------------------------------------------------------

    /// Completed LDPC jobs and other completed tests, condensed for the
    /// comparison dropdown
    pub fn test_summaries(&self) -> StorageResult<Vec<TestSummary>> {
        let mut summaries = Vec::new();

        for job in self.list_ldpc_jobs()? {
            if job.status != "completed" {
                continue;
            }
            let perf = &job.metadata["performance_summary"];
            summaries.push(TestSummary {
                id: job.id,
                name: job.name,
                kind: "LDPC".into(),
                algorithm: job.metadata["test_configuration"]["algorithm_type"]
                    .as_str()
                    .unwrap_or("hardware")
                    .to_string(),
                created: job.created,
                convergence_rate: perf["convergence_rate"].as_f64(),
                energy_per_bit: perf["energy_efficiency_pj_per_bit"].as_f64(),
            });
        }

        let (tests, _) = self.list_tests(&TestFilter {
            status: Some("completed".into()),
            limit: Some(i64::MAX),
            ..Default::default()
        })?;
        for test in tests {
            summaries.push(TestSummary {
                id: test.id,
                name: test.name,
                kind: test.chip_type,
                algorithm: "hardware".into(),
                created: test.created,
                convergence_rate: None,
                energy_per_bit: None,
            });
        }

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scratch_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db"));
        db.init_schema().unwrap();
        (dir, db)
    }

    fn sample_test() -> NewTest {
        NewTest {
            name: "uf20 sweep".into(),
            chip_type: "SAT".into(),
            test_mode: None,
            environment: None,
            config: json!({"iterations": 3}),
            metadata: json!({"progress_percent": 0}),
        }
    }

    #[test]
    fn test_round_trip_preserves_json() {
        let (_dir, db) = scratch_db();
        let id = db.insert_test(&sample_test(), "created").unwrap();

        let test = db.get_test(&id).unwrap();
        assert_eq!(test.name, "uf20 sweep");
        assert_eq!(test.status, "created");
        assert_eq!(test.test_mode.as_deref(), Some("standard"));
        assert_eq!(test.config, json!({"iterations": 3}));
        assert_eq!(test.metadata, json!({"progress_percent": 0}));
    }

    #[test]
    fn test_missing_record_is_not_found() {
        let (_dir, db) = scratch_db();
        assert!(matches!(db.get_test("nope"), Err(StorageError::NotFound)));
        assert!(matches!(db.delete_test("nope"), Err(StorageError::NotFound)));
    }

    #[test]
    fn test_deleting_test_cascades_results() {
        let (_dir, db) = scratch_db();
        let id = db.insert_test(&sample_test(), "completed").unwrap();
        db.insert_test_result(&id, 1, &json!({"satisfiable": true}))
            .unwrap();
        assert_eq!(db.results_for_test(&id).unwrap().len(), 1);

        db.delete_test(&id).unwrap();
        assert!(db.results_for_test(&id).unwrap().is_empty());
    }

    #[test]
    fn test_list_filters_and_counts() {
        let (_dir, db) = scratch_db();
        db.insert_test(&sample_test(), "completed").unwrap();
        db.insert_test(&sample_test(), "running").unwrap();
        let mut ldpc = sample_test();
        ldpc.chip_type = "LDPC".into();
        db.insert_test(&ldpc, "completed").unwrap();

        let (all, total) = db.list_tests(&TestFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(total, 3);

        let (sat_only, sat_total) = db
            .list_tests(&TestFilter {
                chip_type: Some("SAT".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(sat_only.len(), 2);
        assert_eq!(sat_total, 2);

        let (done, _) = db
            .list_tests(&TestFilter {
                chip_type: Some("SAT".into()),
                status: Some("completed".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(done.len(), 1);
    }

    #[test]
    fn test_metadata_merge_preserves_other_keys() {
        let (_dir, db) = scratch_db();
        let id = db.insert_test(&sample_test(), "running").unwrap();
        db.merge_test_metadata(&id, &json!({"problems_completed": 4}))
            .unwrap();

        let test = db.get_test(&id).unwrap();
        assert_eq!(test.metadata["progress_percent"], 0);
        assert_eq!(test.metadata["problems_completed"], 4);
    }

    #[test]
    fn test_ldpc_job_lifecycle() {
        let (_dir, db) = scratch_db();
        let id = db
            .insert_ldpc_job(
                "sweep",
                "ldpc_hardware_test",
                &json!({"start_snr": 5, "end_snr": 6}),
                "running",
                &json!({}),
            )
            .unwrap();

        let job = db.get_ldpc_job(&id).unwrap();
        assert_eq!(job.status, "running");
        assert!(job.started.is_some());
        assert!(job.completed.is_none());
        assert_eq!(job.progress, 0.0);

        db.set_ldpc_progress(&id, 50.0).unwrap();
        assert_eq!(db.get_ldpc_job(&id).unwrap().progress, 50.0);

        db.complete_ldpc_job(&id, &json!({"5dB": {}}), &json!({"ok": true}))
            .unwrap();
        let job = db.get_ldpc_job(&id).unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.progress, 100.0);
        assert!(job.completed.is_some());
    }

    #[test]
    fn test_failed_job_is_stamped() {
        let (_dir, db) = scratch_db();
        let id = db
            .insert_ldpc_job("sweep", "ldpc_hardware_test", &json!({}), "running", &json!({}))
            .unwrap();
        db.fail_ldpc_job(&id).unwrap();
        let job = db.get_ldpc_job(&id).unwrap();
        assert_eq!(job.status, "failed");
        assert!(job.completed.is_some());
    }

    #[test]
    fn test_user_upsert_matches_subject_then_email() {
        let (_dir, db) = scratch_db();
        let first = db
            .upsert_google_user("sub-1", "kay@lab.edu", "Kay")
            .unwrap();
        assert_eq!(first.role, "user");

        // Same subject updates last_login, does not duplicate
        let again = db
            .upsert_google_user("sub-1", "kay@lab.edu", "Kay")
            .unwrap();
        assert_eq!(again.id, first.id);

        // Same email with a new subject still matches the row
        let by_email = db
            .upsert_google_user("sub-2", "kay@lab.edu", "Kay")
            .unwrap();
        assert_eq!(by_email.id, first.id);
    }

    #[test]
    fn test_announcement_crud() {
        let (_dir, db) = scratch_db();
        let id = db
            .insert_announcement(&NewAnnouncement {
                message: "Testbed maintenance at noon".into(),
                kind: "warning".into(),
                expires_at: None,
                created_by: Some("admin".into()),
            })
            .unwrap();

        let listed = db.list_announcements().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, "warning");

        db.delete_announcement(&id).unwrap();
        assert!(db.list_announcements().unwrap().is_empty());
    }

    #[test]
    fn test_summaries_only_include_completed() {
        let (_dir, db) = scratch_db();
        let done = db
            .insert_ldpc_job("done", "ldpc_hardware_test", &json!({}), "running", &json!({}))
            .unwrap();
        db.complete_ldpc_job(
            &done,
            &json!({}),
            &json!({"performance_summary": {"convergence_rate": 0.9}}),
        )
        .unwrap();
        db.insert_ldpc_job("pending", "ldpc_hardware_test", &json!({}), "running", &json!({}))
            .unwrap();

        let summaries = db.test_summaries().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].convergence_rate, Some(0.9));
    }
}
