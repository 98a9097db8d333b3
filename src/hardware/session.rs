//! Long-lived, single-writer session to one accelerator board
//!
//! A session owns exactly one serial link plus the history ring behind it.
//! All I/O on the link happens through `&mut self`, so the pool's
//! `Arc<Mutex<DeviceSession>>` wrapper gives the single-writer guarantee:
//! two handlers may drive two different boards in parallel, but never the
//! same board.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::{DeviceConfig, DeviceType};
use crate::hardware::history::{Direction, HistoryRing};
use crate::hardware::link::SerialLink;
use crate::hardware::manager::PortFinder;
use crate::hardware::protocol::{
    self, DecodeRow, DeviceMessage, SatRunRecord, SatSolveSummary, SnrSummary,
};
use crate::hardware::{HardwareError, HardwareResult};

/// Reconnection budget before the session reports itself dead
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Firmware boot time after opening the port
const BOOT_WAIT: Duration = Duration::from_secs(2);

/// Window for reading startup banners
const BANNER_WINDOW: Duration = Duration::from_secs(5);

/// Wait for a STATUS reply during the handshake fallback
const STATUS_PROBE_WINDOW: Duration = Duration::from_secs(1);

/// A heartbeat older than this triggers an explicit probe
const HEARTBEAT_STALE: Duration = Duration::from_secs(30);

/// Deadline for the explicit STATUS probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default deadline for a single command
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for a campaign command acknowledgment
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall deadline for a bulk campaign
const CAMPAIGN_TIMEOUT: Duration = Duration::from_secs(60);

/// Deadline for the multi-line health enumeration
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of the LDPC chip health enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub power: bool,
    pub clock: bool,
    pub memory: bool,
    pub oscillators: bool,
    pub raw_results: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

pub struct DeviceSession {
    device: DeviceType,
    config: DeviceConfig,
    finder: Arc<dyn PortFinder>,
    port_name: String,
    link: Option<SerialLink>,
    connected: bool,
    last_heartbeat: Instant,
    last_heartbeat_unix: f64,
    connection_attempts: u32,
    history: Arc<HistoryRing>,
}

impl DeviceSession {
    /// Select a port, open it, and perform the handshake.
    ///
    /// Without an explicit port the finder supplies candidates in priority
    /// order; each is briefly opened and reserved before the handshake runs.
    pub fn connect(
        device: DeviceType,
        config: DeviceConfig,
        finder: Arc<dyn PortFinder>,
        port: Option<String>,
    ) -> HardwareResult<DeviceSession> {
        let history = Arc::new(HistoryRing::new());

        let port_name = match port {
            Some(port) => {
                finder.reserve(&port, device)?;
                port
            }
            None => Self::select_port(device, finder.as_ref(), &history)?,
        };

        let mut session = DeviceSession {
            device,
            config,
            finder,
            port_name,
            link: None,
            connected: false,
            last_heartbeat: Instant::now(),
            last_heartbeat_unix: 0.0,
            connection_attempts: 0,
            history,
        };

        match session.establish() {
            Ok(()) => Ok(session),
            Err(e) => {
                session.finder.release(&session.port_name);
                Err(e)
            }
        }
    }

    fn select_port(
        device: DeviceType,
        finder: &dyn PortFinder,
        history: &HistoryRing,
    ) -> HardwareResult<String> {
        for candidate in finder.candidates(device) {
            if SerialLink::probe_open(&candidate).is_err() {
                continue;
            }
            match finder.reserve(&candidate, device) {
                Ok(()) => {
                    history.record(
                        Direction::System,
                        format!("Found {device} board at {candidate}"),
                    );
                    return Ok(candidate);
                }
                Err(HardwareError::PortConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(HardwareError::NoPort(device.to_string()))
    }

    /// Open the link and run the handshake: banner match first, STATUS
    /// probe as fallback
    fn establish(&mut self) -> HardwareResult<()> {
        self.connection_attempts += 1;
        tracing::info!(
            "Connecting to {} at {} (attempt {})",
            self.device,
            self.port_name,
            self.connection_attempts
        );
        self.history.record(
            Direction::System,
            format!(
                "Connecting to {} at {} (attempt {})",
                self.device, self.port_name, self.connection_attempts
            ),
        );

        // Drop any stale handle before reopening
        self.link = None;

        let mut link = SerialLink::open(&self.port_name, self.history.clone())?;
        link.clear_buffers()?;

        self.history
            .record(Direction::System, "Waiting for device initialization...");
        thread::sleep(BOOT_WAIT);

        let mut banner = Vec::new();
        let deadline = Instant::now() + BANNER_WINDOW;
        while Instant::now() < deadline {
            let line = link.read_line(Duration::from_millis(200))?;
            if line.is_empty() {
                continue;
            }
            banner.push(line.clone());
            if self
                .config
                .startup_messages
                .iter()
                .any(|m| line.contains(m.as_str()))
            {
                self.link = Some(link);
                self.connected = true;
                self.touch_heartbeat();
                tracing::info!("Connected to {} via startup banner", self.device);
                self.history
                    .record(Direction::System, "Connection established");
                return Ok(());
            }
        }

        // No banner; ask the firmware directly
        tracing::warn!("No {} ready banner received, probing STATUS", self.device);
        link.write_line("STATUS")?;
        let deadline = Instant::now() + STATUS_PROBE_WINDOW;
        while Instant::now() < deadline {
            let line = link.read_line(Duration::from_millis(200))?;
            if line.is_empty() {
                continue;
            }
            banner.push(line.clone());
            if line.contains("STATUS:READY") {
                self.link = Some(link);
                self.connected = true;
                self.touch_heartbeat();
                tracing::info!("{} connection verified via STATUS probe", self.device);
                self.history
                    .record(Direction::System, "Connection verified via STATUS probe");
                return Ok(());
            }
        }

        self.history.record(
            Direction::System,
            "Device did not respond; firmware may need a reflash",
        );
        Err(HardwareError::HandshakeFailed {
            device: self.device.to_string(),
            banner,
        })
    }

    pub fn device(&self) -> DeviceType {
        self.device
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.link.is_some()
    }

    /// Seconds since the Unix epoch of the last observed heartbeat
    pub fn last_heartbeat_unix(&self) -> f64 {
        self.last_heartbeat_unix
    }

    pub fn history(&self) -> Arc<HistoryRing> {
        self.history.clone()
    }

    fn touch_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
        self.last_heartbeat_unix = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    }

    fn not_connected(&self) -> HardwareError {
        HardwareError::NotConnected {
            device: self.device.to_string(),
        }
    }

    /// Verify the session is healthy, reconnecting within budget.
    ///
    /// Healthy means the link is open and either a heartbeat arrived within
    /// the staleness window or an explicit STATUS probe answers in time.
    pub fn check_connection(&mut self) -> bool {
        if !self.is_connected() {
            tracing::warn!("{} connection lost, attempting to reconnect", self.device);
            self.history
                .record(Direction::System, "Connection lost, reconnecting...");
            if self.connection_attempts >= MAX_RECONNECT_ATTEMPTS {
                self.history.record(
                    Direction::System,
                    "Max reconnect attempts exceeded - hardware may need a reset",
                );
                return false;
            }
            return self.establish().is_ok();
        }

        let mut link = match self.link.take() {
            Some(link) => link,
            None => return false,
        };

        // Sweep pending traffic; heartbeats refresh liveness
        let mut saw_heartbeat = false;
        while link.bytes_available() {
            match link.read_line(Duration::from_millis(100)) {
                Ok(line) if line.is_empty() => break,
                Ok(line) => {
                    if matches!(DeviceMessage::parse(&line), DeviceMessage::Heartbeat) {
                        saw_heartbeat = true;
                    }
                }
                Err(e) => {
                    tracing::error!("{} connection check failed: {}", self.device, e);
                    self.connected = false;
                    return false;
                }
            }
        }
        if saw_heartbeat {
            self.touch_heartbeat();
        }

        if self.last_heartbeat.elapsed() <= HEARTBEAT_STALE {
            self.link = Some(link);
            return true;
        }

        // Heartbeat is stale; ask the firmware directly
        tracing::warn!("No {} heartbeat for 30s, sending status check", self.device);
        if link.write_line("STATUS").is_err() {
            self.connected = false;
            return false;
        }
        let deadline = Instant::now() + PROBE_TIMEOUT;
        while Instant::now() < deadline {
            match link.read_line(Duration::from_millis(200)) {
                Ok(line) if line.is_empty() => continue,
                Ok(line) => match DeviceMessage::parse(&line) {
                    DeviceMessage::StatusReady | DeviceMessage::Heartbeat => {
                        self.touch_heartbeat();
                        self.link = Some(link);
                        return true;
                    }
                    _ => continue,
                },
                Err(_) => break,
            }
        }

        self.history.record(
            Direction::System,
            "No response to status check - press the RESET button on the board and retry",
        );
        self.connected = false;
        false
    }

    fn ensure_connected(&mut self) -> HardwareResult<()> {
        if self.check_connection() {
            Ok(())
        } else {
            Err(self.not_connected())
        }
    }

    fn take_link(&mut self) -> HardwareResult<SerialLink> {
        self.link.take().ok_or_else(|| self.not_connected())
    }

    /// Execute one command and collect its response lines.
    ///
    /// Reading stops early on the first terminator-prefixed line; an
    /// `ERROR:` line becomes a `Device` error carrying that line.
    pub fn execute(&mut self, command: &str, timeout: Duration) -> HardwareResult<String> {
        self.ensure_connected()?;
        let mut link = self.take_link()?;

        let result = Self::execute_on(&mut link, command, timeout);
        match &result {
            Err(HardwareError::Io(_)) | Err(HardwareError::Serial(_)) => {
                // The link is gone; next use reconnects
                self.connected = false;
            }
            _ => self.link = Some(link),
        }
        result
    }

    fn execute_on(
        link: &mut SerialLink,
        command: &str,
        timeout: Duration,
    ) -> HardwareResult<String> {
        link.drain()?;
        link.write_line(command)?;

        let mut responses = Vec::new();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let line = link.read_line(Duration::from_millis(100))?;
            if line.is_empty() {
                continue;
            }
            if matches!(DeviceMessage::parse(&line), DeviceMessage::Heartbeat) {
                continue;
            }
            if let DeviceMessage::Error(_) = DeviceMessage::parse(&line) {
                return Err(HardwareError::Device(line));
            }
            let done = protocol::is_terminator(&line);
            responses.push(line);
            if done {
                break;
            }
        }

        if responses.is_empty() {
            Ok("No response".into())
        } else {
            Ok(responses.join("\n"))
        }
    }

    /// Run the LDPC chip health enumeration
    pub fn health_check(&mut self) -> HardwareResult<HealthReport> {
        self.ensure_connected()?;
        let mut link = self.take_link()?;

        link.write_line("HEALTH_CHECK")?;
        let mut raw = Vec::new();
        let deadline = Instant::now() + HEALTH_TIMEOUT;
        let mut outcome = None;
        while Instant::now() < deadline {
            let line = link.read_line(Duration::from_millis(200))?;
            if line.is_empty() {
                continue;
            }
            raw.push(line.clone());
            if let DeviceMessage::HealthCheckComplete { ok } = DeviceMessage::parse(&line) {
                outcome = Some(ok);
                break;
            }
        }
        self.link = Some(link);

        let report = match outcome {
            Some(ok) => HealthReport {
                status: if ok { "healthy".into() } else { "error".into() },
                power: raw.iter().any(|r| r.contains("POWER_OK")),
                clock: raw.iter().any(|r| r.contains("CLOCK_OK")),
                memory: raw.iter().any(|r| r.contains("MEMORY_OK")),
                oscillators: raw.iter().any(|r| r.contains("OSCILLATORS_OK")),
                raw_results: raw,
            },
            None => HealthReport {
                status: "error".into(),
                power: false,
                clock: false,
                memory: false,
                oscillators: false,
                raw_results: raw,
            },
        };
        Ok(report)
    }

    /// Stream one SNR campaign off the board and aggregate its CSV telemetry
    pub fn run_snr_test(&mut self, snr_db: i64, num_runs: u32) -> HardwareResult<SnrSummary> {
        self.ensure_connected()?;
        let mut link = self.take_link()?;

        tracing::info!(
            "Starting SNR {}dB test: {} runs on {}",
            snr_db,
            num_runs,
            self.device
        );

        match Self::snr_campaign(&mut link, snr_db, num_runs) {
            Ok(rows) => {
                self.link = Some(link);
                SnrSummary::aggregate(snr_db, num_runs, rows)
            }
            Err(e) => {
                self.abort_campaign(link);
                Err(e)
            }
        }
    }

    fn snr_campaign(
        link: &mut SerialLink,
        snr_db: i64,
        num_runs: u32,
    ) -> HardwareResult<Vec<DecodeRow>> {
        link.drain()?;

        let command = format!("SIMPLE_TEST:{snr_db}:{num_runs}");
        link.write_line(&command)?;

        let expected_ack = format!("SIMPLE_TEST:{snr_db}:{num_runs}");
        Self::await_ack(link, &command, &expected_ack)?;

        let mut header: Option<Vec<String>> = None;
        let mut rows = Vec::new();
        let mut started = false;
        let deadline = Instant::now() + CAMPAIGN_TIMEOUT;

        while Instant::now() < deadline {
            let line = link.read_line(Duration::from_millis(100))?;
            if line.is_empty() {
                continue;
            }
            match DeviceMessage::parse(&line) {
                DeviceMessage::SimpleTestStart => started = true,
                DeviceMessage::CsvHeader(fields) => header = Some(fields),
                DeviceMessage::CsvData(values) => {
                    if let Some(fields) = &header {
                        match DecodeRow::from_csv(fields, &values) {
                            Some(row) => rows.push(row),
                            None => tracing::debug!("Dropping CSV row with mismatched width"),
                        }
                    }
                }
                DeviceMessage::SimpleTestComplete => return Ok(rows),
                DeviceMessage::Error(_) => return Err(HardwareError::Device(line)),
                _ => {}
            }
        }

        if !started {
            return Err(HardwareError::Timeout("campaign never started".into()));
        }
        Err(HardwareError::Timeout("SNR campaign deadline elapsed".into()))
    }

    /// Drive a hardware SAT campaign and aggregate the RESULT stream
    pub fn solve_sat_problem(
        &mut self,
        dimacs: &str,
        problem_count: u32,
    ) -> HardwareResult<SatSolveSummary> {
        let (variables, clauses) = protocol::parse_cnf_header(dimacs)
            .ok_or_else(|| HardwareError::InvalidInput("missing DIMACS `p cnf` header".into()))?;
        let class = protocol::problem_class(variables);

        self.ensure_connected()?;
        let mut link = self.take_link()?;

        tracing::info!(
            "Starting SAT solve on {}: class {}, {} problems",
            self.device,
            class,
            problem_count
        );

        match Self::sat_campaign(&mut link, class, problem_count) {
            Ok(runs) => {
                self.link = Some(link);
                SatSolveSummary::aggregate(class, variables, clauses, problem_count, runs)
            }
            Err(e) => {
                self.abort_campaign(link);
                Err(e)
            }
        }
    }

    fn sat_campaign(
        link: &mut SerialLink,
        class: &str,
        problem_count: u32,
    ) -> HardwareResult<Vec<SatRunRecord>> {
        link.drain()?;

        let command = format!("SAT_TEST:{class}:{problem_count}");
        link.write_line(&command)?;
        Self::await_ack(link, &command, "SAT_TEST")?;

        let mut runs = Vec::new();
        let deadline = Instant::now() + CAMPAIGN_TIMEOUT;
        while Instant::now() < deadline {
            let line = link.read_line(Duration::from_millis(100))?;
            if line.is_empty() {
                continue;
            }
            match DeviceMessage::parse(&line) {
                DeviceMessage::SatResult(record) => runs.push(record),
                DeviceMessage::SatTestComplete => return Ok(runs),
                DeviceMessage::Error(_) => return Err(HardwareError::Device(line)),
                _ => {}
            }
        }
        Err(HardwareError::Timeout("SAT campaign deadline elapsed".into()))
    }

    fn await_ack(link: &mut SerialLink, command: &str, expected: &str) -> HardwareResult<()> {
        let deadline = Instant::now() + ACK_TIMEOUT;
        while Instant::now() < deadline {
            let line = link.read_line(Duration::from_millis(100))?;
            if line.is_empty() {
                continue;
            }
            match DeviceMessage::parse(&line) {
                DeviceMessage::Ack(cmd) if cmd.starts_with(expected) => return Ok(()),
                DeviceMessage::Error(_) => return Err(HardwareError::Device(line)),
                _ => {}
            }
        }
        Err(HardwareError::NoAck {
            command: command.to_string(),
        })
    }

    /// Best-effort device reset after a failed campaign, keeping the link
    fn abort_campaign(&mut self, mut link: SerialLink) {
        if link.write_line("RESET").is_ok() {
            thread::sleep(Duration::from_secs(2));
            self.history
                .record(Direction::System, "Reset sent due to campaign error");
            self.link = Some(link);
        } else {
            self.connected = false;
        }
    }

    /// Append a UI-visible separator to the history only
    pub fn add_session_separator(&self, text: &str) {
        self.history
            .record(Direction::System, format!("--- {text} ---"));
    }

    /// Clean shutdown: LED command, drop the link, free the port
    pub fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.close(&self.config.idle_led_command);
        }
        self.connected = false;
        self.finder.release(&self.port_name);
        self.history.record(Direction::System, "Session closed");
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.connected || self.link.is_some() {
            self.close();
        }
    }
}
