//! Line-oriented serial link to one board
//!
//! Wraps a raw serial handle with the wire conventions every board shares:
//! 2 Mbaud 8N1, `\n`-delimited ASCII, bounded reads. Every line that actually
//! crosses the wire is recorded in the session's history ring, with the
//! exception of heartbeat beacons which would flood it.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::hardware::history::{Direction, HistoryRing};
use crate::hardware::HardwareResult;

/// Wire baud rate shared by all boards
pub const BAUD_RATE: u32 = 2_000_000;

/// Default deadline for a single line read
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a write may block before the port reports a timeout
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll granularity inside read loops
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct SerialLink {
    port: Box<dyn SerialPort>,
    port_name: String,
    rx: Vec<u8>,
    history: Arc<HistoryRing>,
}

impl SerialLink {
    /// Open a port with the shared wire settings
    pub fn open(port_name: &str, history: Arc<HistoryRing>) -> HardwareResult<SerialLink> {
        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(POLL_INTERVAL)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;

        Ok(SerialLink {
            port,
            port_name: port_name.to_string(),
            rx: Vec::new(),
            history,
        })
    }

    /// Briefly open a port to verify it exists and is not busy
    pub fn probe_open(port_name: &str) -> HardwareResult<()> {
        serialport::new(port_name, BAUD_RATE)
            .timeout(Duration::from_millis(100))
            .open()?;
        Ok(())
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Discard any pending input and output on the device side
    pub fn clear_buffers(&mut self) -> HardwareResult<()> {
        self.port.clear(ClearBuffer::All)?;
        self.rx.clear();
        Ok(())
    }

    /// Send one line, newline-terminated, and record it as sent
    pub fn write_line(&mut self, text: &str) -> HardwareResult<()> {
        let deadline = Instant::now() + WRITE_TIMEOUT;
        self.port.write_all(text.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        if Instant::now() > deadline {
            tracing::warn!("Slow serial write on {}", self.port_name);
        }
        self.history.record(Direction::Sent, text);
        Ok(())
    }

    /// Whether input is pending either in our buffer or the driver's
    pub fn bytes_available(&mut self) -> bool {
        if self.rx.contains(&b'\n') {
            return true;
        }
        self.port.bytes_to_read().map(|n| n > 0).unwrap_or(false)
    }

    /// Read one `\n`-terminated line within the deadline.
    ///
    /// Invalid UTF-8 is replaced, trailing whitespace stripped. Returns an
    /// empty string when the deadline passes without a complete line.
    /// Non-empty lines are recorded as received (heartbeats excepted).
    pub fn read_line(&mut self, deadline: Duration) -> HardwareResult<String> {
        let start = Instant::now();
        loop {
            if let Some(pos) = self.rx.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.rx.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                if !line.is_empty() && !line.starts_with("HEARTBEAT") {
                    self.history.record(Direction::Received, &line);
                }
                return Ok(line);
            }

            if start.elapsed() >= deadline {
                return Ok(String::new());
            }

            let mut buf = [0u8; 256];
            match self.port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => self.rx.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read and record every immediately-available line
    pub fn drain(&mut self) -> HardwareResult<Vec<String>> {
        let mut drained = Vec::new();
        while self.bytes_available() {
            let line = self.read_line(POLL_INTERVAL)?;
            if line.is_empty() {
                break;
            }
            drained.push(line);
        }
        Ok(drained)
    }

    /// Best-effort LED command, then drop the handle
    pub fn close(mut self, idle_command: &str) {
        if let Err(e) = self.write_line(idle_command) {
            tracing::debug!("Ignoring close-time LED write failure: {}", e);
        }
        tracing::info!("Serial link to {} closed", self.port_name);
    }
}
