// Hardware abstraction layer: scanner, serial link, sessions, pool, manager
pub mod firmware;
pub mod history;
pub mod link;
pub mod manager;
pub mod pool;
pub mod protocol;
pub mod scanner;
pub mod session;

pub use history::{Direction, HistoryEntry, HistoryRing};
pub use link::SerialLink;
pub use manager::{DeviceManager, PortFinder};
pub use pool::SessionPool;
pub use scanner::{teensy_candidates, ScannedPort};
pub use session::DeviceSession;

/// Result type for hardware operations
pub type HardwareResult<T> = Result<T, HardwareError>;

/// Hardware-layer errors surfaced to the HTTP boundary
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("GPIO not initialized - hardware reset unavailable on this host")]
    GpioUnavailable,

    #[error("Unknown device type: {0}")]
    UnknownDevice(String),

    #[error("{device} hardware not connected - press the RESET button on the board and retry")]
    NotConnected { device: String },

    #[error("Handshake with {device} failed; banner: {banner:?}")]
    HandshakeFailed { device: String, banner: Vec<String> },

    #[error("No acknowledgment received for {command}")]
    NoAck { command: String },

    #[error("Device reported error: {0}")]
    Device(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Port {port} already registered to {owner}")]
    PortConflict { port: String, owner: String },

    #[error("No usable serial port found for {0}")]
    NoPort(String),

    #[error("Campaign produced no data")]
    NoData,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Firmware toolchain error: {0}")]
    Firmware(String),

    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
