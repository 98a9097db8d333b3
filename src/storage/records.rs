//! Typed rows and request payloads for the persistent store
//!
//! JSON-valued columns are TEXT in SQLite; the accessors here parse them
//! defensively so a malformed blob degrades to an empty object instead of
//! failing the read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parse a JSON column, tolerating NULL and malformed content
pub fn parse_json_column(raw: Option<String>) -> Value {
    match raw {
        Some(text) => serde_json::from_str(&text).unwrap_or_else(|_| Value::Object(Default::default())),
        None => Value::Object(Default::default()),
    }
}

/// A persisted test campaign
#[derive(Debug, Clone, Serialize)]
pub struct TestRecord {
    pub id: String,
    pub name: String,
    pub chip_type: String,
    pub test_mode: Option<String>,
    pub environment: Option<String>,
    pub config: Value,
    pub status: String,
    pub created: String,
    pub metadata: Value,
    /// Attached result rows, populated by detail queries
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<TestResultRecord>,
}

/// One iteration's detailed results for a test
#[derive(Debug, Clone, Serialize)]
pub struct TestResultRecord {
    pub id: String,
    pub test_id: String,
    pub iteration: i64,
    pub timestamp: String,
    pub results: Value,
}

/// A persisted LDPC SNR sweep job
#[derive(Debug, Clone, Serialize)]
pub struct LdpcJobRecord {
    pub id: String,
    pub name: String,
    pub job_type: String,
    pub config: Value,
    pub status: String,
    pub created: String,
    pub started: Option<String>,
    pub completed: Option<String>,
    pub results: Value,
    pub progress: f64,
    pub metadata: Value,
}

/// A registered user
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub created_at: String,
    pub last_login: Option<String>,
}

/// One system metric sample
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetricRecord {
    pub id: String,
    pub timestamp: String,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub temperature: Option<f64>,
}

/// A system announcement shown to frontend users
#[derive(Debug, Clone, Serialize)]
pub struct AnnouncementRecord {
    pub id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub expires_at: Option<String>,
    pub created_at: String,
    pub created_by: String,
    pub active: bool,
}

/// Payload for creating a test row
#[derive(Debug, Clone, Deserialize)]
pub struct NewTest {
    pub name: String,
    pub chip_type: String,
    #[serde(default)]
    pub test_mode: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub metadata: Value,
}

/// Query filters for listing tests
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestFilter {
    pub chip_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Mutable test fields accepted by update routes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestUpdate {
    pub name: Option<String>,
    pub status: Option<String>,
    pub config: Option<Value>,
    pub metadata: Option<Value>,
}

/// Mutable LDPC job fields accepted by update routes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LdpcJobUpdate {
    pub name: Option<String>,
    pub status: Option<String>,
    pub config: Option<Value>,
    pub metadata: Option<Value>,
}

/// Payload for posting an announcement
#[derive(Debug, Clone, Deserialize)]
pub struct NewAnnouncement {
    pub message: String,
    #[serde(rename = "type", default = "default_announcement_kind")]
    pub kind: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_announcement_kind() -> String {
    "info".into()
}

/// Condensed entry for the comparison dropdowns
#[derive(Debug, Clone, Serialize)]
pub struct TestSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub algorithm: String,
    pub created: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convergence_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_per_bit: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_json_degrades_to_empty_object() {
        assert_eq!(parse_json_column(None), serde_json::json!({}));
        assert_eq!(parse_json_column(Some("{broken".into())), serde_json::json!({}));
        assert_eq!(
            parse_json_column(Some(r#"{"a":1}"#.into())),
            serde_json::json!({"a": 1})
        );
    }
}
