//! Typed wire protocol for the accelerator boards
//!
//! The boards speak a line-oriented ASCII protocol dispatched by prefix.
//! Everything coming off the wire is parsed once, here, into a tagged
//! message; the session layers never re-inspect raw strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hardware::{HardwareError, HardwareResult};

/// Response prefixes that terminate a command's read loop
const TERMINATOR_PREFIXES: [&str; 5] = ["ACK:", "STATUS:", "ERROR:", "DACROQ_BOARD:", "COMPLETE"];

/// Number of information bits per LDPC frame for the (96,48) code
pub const LDPC_INFO_BITS: u64 = 48;

/// Default power draw reported when the firmware omits the field (mW)
pub const DEFAULT_POWER_MW: f64 = 5.9;

/// Default energy per bit reported when the firmware omits the field (pJ)
pub const DEFAULT_ENERGY_PJ: f64 = 5.47;

/// One device→host message class
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    /// `DACROQ_BOARD:<id>` board identification
    Board(String),
    /// `STATUS:READY`
    StatusReady,
    /// `STATUS:<other>`
    StatusError(String),
    /// `HEARTBEAT...` liveness beacon
    Heartbeat,
    /// `ACK:<cmd>` command acknowledgment
    Ack(String),
    /// `ERROR:<msg>` device-side failure
    Error(String),
    /// `SIMPLE_TEST_START:` campaign begin
    SimpleTestStart,
    /// `CSV_HEADER:<fields>`
    CsvHeader(Vec<String>),
    /// `CSV_DATA:<values>`
    CsvData(Vec<String>),
    /// `SIMPLE_TEST_COMPLETE:SUCCESS`
    SimpleTestComplete,
    /// `RESULT:<csv>` one SAT run
    SatResult(SatRunRecord),
    /// `TEST_COMPLETE` end of SAT campaign
    SatTestComplete,
    /// `HEALTH_CHECK_COMPLETE:OK|ERR`
    HealthCheckComplete { ok: bool },
    /// Anything else (banners, health detail lines, ...)
    Other(String),
}

impl DeviceMessage {
    pub fn parse(line: &str) -> DeviceMessage {
        if let Some(id) = line.strip_prefix("DACROQ_BOARD:") {
            return DeviceMessage::Board(id.to_string());
        }
        if line.starts_with("STATUS:READY") {
            return DeviceMessage::StatusReady;
        }
        if let Some(rest) = line.strip_prefix("STATUS:") {
            return DeviceMessage::StatusError(rest.to_string());
        }
        if line.starts_with("HEARTBEAT") {
            return DeviceMessage::Heartbeat;
        }
        if let Some(cmd) = line.strip_prefix("ACK:") {
            return DeviceMessage::Ack(cmd.to_string());
        }
        if let Some(msg) = line.strip_prefix("ERROR:") {
            return DeviceMessage::Error(msg.to_string());
        }
        if line.starts_with("SIMPLE_TEST_START:") {
            return DeviceMessage::SimpleTestStart;
        }
        if let Some(fields) = line.strip_prefix("CSV_HEADER:") {
            return DeviceMessage::CsvHeader(
                fields.split(',').map(|f| f.trim().to_string()).collect(),
            );
        }
        if let Some(values) = line.strip_prefix("CSV_DATA:") {
            return DeviceMessage::CsvData(
                values.split(',').map(|v| v.trim().to_string()).collect(),
            );
        }
        if line == "SIMPLE_TEST_COMPLETE:SUCCESS" {
            return DeviceMessage::SimpleTestComplete;
        }
        if let Some(csv) = line.strip_prefix("RESULT:") {
            if let Some(record) = SatRunRecord::parse(csv) {
                return DeviceMessage::SatResult(record);
            }
            return DeviceMessage::Other(line.to_string());
        }
        if line == "TEST_COMPLETE" {
            return DeviceMessage::SatTestComplete;
        }
        if let Some(result) = line.strip_prefix("HEALTH_CHECK_COMPLETE:") {
            return DeviceMessage::HealthCheckComplete {
                ok: result == "OK",
            };
        }
        DeviceMessage::Other(line.to_string())
    }
}

/// Does this line end a command's response?
pub fn is_terminator(line: &str) -> bool {
    TERMINATOR_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// One parsed `CSV_DATA` row from an LDPC SNR campaign
///
/// Fields are coerced by header name; unknown columns land in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodeRow {
    pub test_index: i64,
    pub snr_db: i64,
    pub execution_time_us: i64,
    pub bit_errors: i64,
    pub frame_errors: i64,
    pub success: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_per_bit_pj: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_power_mw: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl DecodeRow {
    /// Build a row from a header and a value list.
    ///
    /// Returns `None` on width mismatch; the caller drops the row and keeps
    /// aggregating the rest. Unparseable numeric fields coerce to zero.
    pub fn from_csv(header: &[String], values: &[String]) -> Option<DecodeRow> {
        if header.len() != values.len() {
            return None;
        }

        let mut row = DecodeRow::default();
        for (name, value) in header.iter().zip(values) {
            match name.as_str() {
                "test_index" => row.test_index = value.parse().unwrap_or(0),
                "snr_db" => row.snr_db = value.parse().unwrap_or(0),
                "execution_time_us" => row.execution_time_us = value.parse().unwrap_or(0),
                "bit_errors" => row.bit_errors = value.parse().unwrap_or(0),
                "frame_errors" => row.frame_errors = value.parse().unwrap_or(0),
                "success" => row.success = value.parse().unwrap_or(0),
                "energy_per_bit_pj" => row.energy_per_bit_pj = value.parse().ok(),
                "avg_power_mw" => row.avg_power_mw = value.parse().ok(),
                _ => {
                    row.extra.insert(name.clone(), value.clone());
                }
            }
        }
        Some(row)
    }
}

/// Aggregate summary of one SNR point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnrSummary {
    pub snr_db: i64,
    pub num_runs: u32,
    pub results: Vec<DecodeRow>,
    pub successful_decodes: u64,
    pub total_vectors: u64,
    pub avg_execution_time_us: f64,
    pub bit_error_rate: f64,
    pub frame_error_rate: f64,
    pub energy_efficiency_pj_per_bit: f64,
    pub avg_power_consumption_mw: f64,
    pub throughput_mbps: f64,
    pub convergence_rate: f64,
}

impl SnrSummary {
    /// Fold decoded rows into the per-SNR summary.
    ///
    /// An empty row set is `NoData`, never a divide-by-zero.
    pub fn aggregate(snr_db: i64, num_runs: u32, rows: Vec<DecodeRow>) -> HardwareResult<Self> {
        if rows.is_empty() {
            return Err(HardwareError::NoData);
        }

        let n = rows.len() as u64;
        let successful_decodes = rows.iter().filter(|r| r.success == 1).count() as u64;
        let total_bit_errors: i64 = rows.iter().map(|r| r.bit_errors).sum();
        let total_frame_errors: i64 = rows.iter().map(|r| r.frame_errors).sum();
        let avg_execution_time_us =
            rows.iter().map(|r| r.execution_time_us as f64).sum::<f64>() / n as f64;
        let avg_power = rows
            .iter()
            .map(|r| r.avg_power_mw.unwrap_or(DEFAULT_POWER_MW))
            .sum::<f64>()
            / n as f64;
        let avg_energy = rows
            .iter()
            .map(|r| r.energy_per_bit_pj.unwrap_or(DEFAULT_ENERGY_PJ))
            .sum::<f64>()
            / n as f64;

        let total_bits = (n * LDPC_INFO_BITS) as f64;
        let throughput_mbps = if avg_execution_time_us > 0.0 {
            (LDPC_INFO_BITS as f64 * 1e6) / avg_execution_time_us
        } else {
            0.0
        };

        Ok(SnrSummary {
            snr_db,
            num_runs,
            successful_decodes,
            total_vectors: n,
            avg_execution_time_us,
            bit_error_rate: total_bit_errors as f64 / total_bits,
            frame_error_rate: total_frame_errors as f64 / n as f64,
            energy_efficiency_pj_per_bit: avg_energy,
            avg_power_consumption_mw: avg_power,
            throughput_mbps,
            convergence_rate: successful_decodes as f64 / n as f64,
            results: rows,
        })
    }
}

/// One `RESULT:` line from a SAT campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatRunRecord {
    pub run: i64,
    pub satisfiable: bool,
    pub solve_time_ms: f64,
    pub energy_nj: f64,
    pub power_mw: f64,
    pub propagations: i64,
    pub success: bool,
}

impl SatRunRecord {
    /// Parse `run,sat|unsat,time_us,energy_nj,power_mw,propagations`
    fn parse(csv: &str) -> Option<SatRunRecord> {
        let fields: Vec<&str> = csv.split(',').map(str::trim).collect();
        if fields.len() < 6 {
            return None;
        }
        Some(SatRunRecord {
            run: fields[0].parse().ok()?,
            satisfiable: fields[1].eq_ignore_ascii_case("sat"),
            solve_time_ms: fields[2].parse::<f64>().ok()? / 1000.0,
            energy_nj: fields[3].parse().ok()?,
            power_mw: fields[4].parse().ok()?,
            propagations: fields[5].parse().ok()?,
            success: true,
        })
    }
}

/// Aggregate summary of a hardware SAT campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatSolveSummary {
    pub solver: String,
    pub problem_type: String,
    pub variables: u32,
    pub clauses: u32,
    pub total_problems: u32,
    pub successful_solves: u64,
    pub sat_count: u64,
    pub unsat_count: u64,
    pub satisfiability_rate: f64,
    pub avg_solve_time_ms: f64,
    pub total_time_ms: f64,
    pub avg_energy_nj: f64,
    pub avg_power_mw: f64,
    pub runs: Vec<SatRunRecord>,
}

impl SatSolveSummary {
    pub fn aggregate(
        problem_type: &str,
        variables: u32,
        clauses: u32,
        total_problems: u32,
        runs: Vec<SatRunRecord>,
    ) -> HardwareResult<Self> {
        if runs.is_empty() {
            return Err(HardwareError::NoData);
        }

        let n = runs.len() as u64;
        let sat_count = runs.iter().filter(|r| r.satisfiable).count() as u64;
        let total_time_ms: f64 = runs.iter().map(|r| r.solve_time_ms).sum();
        let avg_energy = runs.iter().map(|r| r.energy_nj).sum::<f64>() / n as f64;
        let avg_power = runs.iter().map(|r| r.power_mw).sum::<f64>() / n as f64;

        Ok(SatSolveSummary {
            solver: "daedalus".into(),
            problem_type: problem_type.into(),
            variables,
            clauses,
            total_problems,
            successful_solves: n,
            sat_count,
            unsat_count: n - sat_count,
            satisfiability_rate: sat_count as f64 / n as f64,
            avg_solve_time_ms: total_time_ms / n as f64,
            total_time_ms,
            avg_energy_nj: avg_energy,
            avg_power_mw: avg_power,
            runs,
        })
    }
}

/// Parse the `p cnf V C` header of a DIMACS document
pub fn parse_cnf_header(dimacs: &str) -> Option<(u32, u32)> {
    for line in dimacs.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("p cnf") {
            let mut parts = rest.split_whitespace();
            let vars = parts.next()?.parse().ok()?;
            let clauses = parts.next()?.parse().ok()?;
            return Some((vars, clauses));
        }
    }
    None
}

/// Map a variable count onto the firmware's problem classes
pub fn problem_class(variables: u32) -> &'static str {
    if variables <= 20 {
        "uf20"
    } else if variables <= 50 {
        "uf50"
    } else {
        "uf100"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_dispatch() {
        assert_eq!(
            DeviceMessage::parse("DACROQ_BOARD:LDPC"),
            DeviceMessage::Board("LDPC".into())
        );
        assert_eq!(DeviceMessage::parse("STATUS:READY"), DeviceMessage::StatusReady);
        assert_eq!(DeviceMessage::parse("HEARTBEAT:1234"), DeviceMessage::Heartbeat);
        assert_eq!(
            DeviceMessage::parse("ACK:SIMPLE_TEST:5:2"),
            DeviceMessage::Ack("SIMPLE_TEST:5:2".into())
        );
        assert_eq!(
            DeviceMessage::parse("ERROR:oscillator stall"),
            DeviceMessage::Error("oscillator stall".into())
        );
        assert_eq!(
            DeviceMessage::parse("SIMPLE_TEST_COMPLETE:SUCCESS"),
            DeviceMessage::SimpleTestComplete
        );
        assert_eq!(DeviceMessage::parse("TEST_COMPLETE"), DeviceMessage::SatTestComplete);
        assert_eq!(
            DeviceMessage::parse("HEALTH_CHECK_COMPLETE:OK"),
            DeviceMessage::HealthCheckComplete { ok: true }
        );
        assert_eq!(
            DeviceMessage::parse("AMORGOS LDPC Decoder Ready"),
            DeviceMessage::Other("AMORGOS LDPC Decoder Ready".into())
        );
    }

    #[test]
    fn test_terminator_prefixes() {
        assert!(is_terminator("ACK:STATUS"));
        assert!(is_terminator("STATUS:READY"));
        assert!(is_terminator("ERROR:bad state"));
        assert!(is_terminator("DACROQ_BOARD:SAT"));
        assert!(is_terminator("COMPLETE"));
        assert!(!is_terminator("CSV_DATA:1,2,3"));
        // Prefix match, not substring match
        assert!(!is_terminator("TEST ACK: nested"));
    }

    #[test]
    fn test_csv_row_coercion() {
        let header: Vec<String> = [
            "test_index",
            "snr_db",
            "execution_time_us",
            "bit_errors",
            "frame_errors",
            "success",
            "energy_per_bit_pj",
            "avg_power_mw",
            "vector_id",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let values: Vec<String> = ["0", "5", "812", "2", "0", "1", "5.47", "5.9", "vec_007"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let row = DecodeRow::from_csv(&header, &values).unwrap();
        assert_eq!(row.test_index, 0);
        assert_eq!(row.snr_db, 5);
        assert_eq!(row.execution_time_us, 812);
        assert_eq!(row.success, 1);
        assert_eq!(row.energy_per_bit_pj, Some(5.47));
        assert_eq!(row.extra.get("vector_id").unwrap(), "vec_007");
    }

    #[test]
    fn test_csv_width_mismatch_drops_row() {
        let header: Vec<String> = vec!["test_index".into(), "snr_db".into()];
        let values: Vec<String> = vec!["0".into()];
        assert!(DecodeRow::from_csv(&header, &values).is_none());
    }

    #[test]
    fn test_csv_unparseable_int_coerces_to_zero() {
        let header: Vec<String> = vec!["bit_errors".into()];
        let values: Vec<String> = vec!["garbage".into()];
        let row = DecodeRow::from_csv(&header, &values).unwrap();
        assert_eq!(row.bit_errors, 0);
    }

    #[test]
    fn test_snr_aggregation() {
        let header: Vec<String> = [
            "test_index",
            "snr_db",
            "execution_time_us",
            "bit_errors",
            "frame_errors",
            "success",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let rows: Vec<DecodeRow> = [
            ["0", "5", "1000", "0", "0", "1"],
            ["1", "5", "3000", "48", "1", "0"],
        ]
        .iter()
        .map(|v| {
            let values: Vec<String> = v.iter().map(|s| s.to_string()).collect();
            DecodeRow::from_csv(&header, &values).unwrap()
        })
        .collect();

        let summary = SnrSummary::aggregate(5, 2, rows).unwrap();
        assert_eq!(summary.total_vectors, 2);
        assert_eq!(summary.successful_decodes, 1);
        assert_eq!(summary.avg_execution_time_us, 2000.0);
        // 48 bit errors over 2 frames * 48 bits
        assert_eq!(summary.bit_error_rate, 0.5);
        assert_eq!(summary.frame_error_rate, 0.5);
        assert_eq!(summary.convergence_rate, 0.5);
        assert_eq!(summary.throughput_mbps, 48.0 * 1e6 / 2000.0);
        // Defaults apply when the firmware omits the power fields
        assert_eq!(summary.avg_power_consumption_mw, DEFAULT_POWER_MW);
        assert_eq!(summary.energy_efficiency_pj_per_bit, DEFAULT_ENERGY_PJ);
    }

    #[test]
    fn test_empty_campaign_is_no_data() {
        assert!(matches!(
            SnrSummary::aggregate(5, 1, Vec::new()),
            Err(HardwareError::NoData)
        ));
        assert!(matches!(
            SatSolveSummary::aggregate("uf20", 20, 91, 1, Vec::new()),
            Err(HardwareError::NoData)
        ));
    }

    #[test]
    fn test_sat_result_line() {
        let msg = DeviceMessage::parse("RESULT:1,SAT,1500,12.5,4.2,321");
        match msg {
            DeviceMessage::SatResult(r) => {
                assert_eq!(r.run, 1);
                assert!(r.satisfiable);
                assert_eq!(r.solve_time_ms, 1.5);
                assert_eq!(r.energy_nj, 12.5);
                assert_eq!(r.propagations, 321);
            }
            other => panic!("expected SatResult, got {other:?}"),
        }
    }

    #[test]
    fn test_sat_summary_counts() {
        let runs = vec![
            SatRunRecord::parse("1,SAT,1000,10.0,4.0,100").unwrap(),
            SatRunRecord::parse("2,UNSAT,2000,20.0,6.0,200").unwrap(),
        ];
        let summary = SatSolveSummary::aggregate("uf20", 20, 91, 2, runs).unwrap();
        assert_eq!(summary.sat_count, 1);
        assert_eq!(summary.unsat_count, 1);
        assert_eq!(summary.satisfiability_rate, 0.5);
        assert_eq!(summary.avg_solve_time_ms, 1.5);
    }

    #[test]
    fn test_cnf_header_and_class() {
        let dimacs = "c comment\np cnf 50 218\n1 2 3 0\n";
        assert_eq!(parse_cnf_header(dimacs), Some((50, 218)));
        assert_eq!(problem_class(20), "uf20");
        assert_eq!(problem_class(50), "uf50");
        assert_eq!(problem_class(100), "uf100");
        assert!(parse_cnf_header("1 2 0").is_none());
    }
}
