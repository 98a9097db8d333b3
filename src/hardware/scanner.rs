//! USB serial port enumeration
//!
//! The scanner only lists ports and their USB metadata; it never performs
//! I/O on them. Identification probes belong to the device manager.

use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};

/// Teensy (PJRC) USB vendor id
const TEENSY_VID: u16 = 0x16C0;

/// One enumerated serial port with the USB metadata the host reports
#[derive(Debug, Clone, Serialize)]
pub struct ScannedPort {
    pub path: String,
    pub description: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
}

impl ScannedPort {
    fn from_info(info: &SerialPortInfo) -> Self {
        match &info.port_type {
            SerialPortType::UsbPort(usb) => ScannedPort {
                path: info.port_name.clone(),
                description: usb.product.clone().unwrap_or_default(),
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number.clone(),
            },
            _ => ScannedPort {
                path: info.port_name.clone(),
                description: String::new(),
                vid: None,
                pid: None,
                serial_number: None,
            },
        }
    }

    /// A port that plausibly hosts one of our boards
    pub fn is_teensy_candidate(&self) -> bool {
        if self.vid == Some(TEENSY_VID) {
            return true;
        }
        let desc = self.description.to_lowercase();
        desc.contains("teensy") || desc.contains("usbmodem")
    }
}

/// Enumerate every serial port the host reports
pub fn scan_ports() -> Vec<ScannedPort> {
    match serialport::available_ports() {
        Ok(ports) => ports.iter().map(ScannedPort::from_info).collect(),
        Err(e) => {
            tracing::warn!("Serial port enumeration failed: {}", e);
            Vec::new()
        }
    }
}

/// Enumerate only Teensy-candidate ports
pub fn teensy_candidates() -> Vec<ScannedPort> {
    scan_ports()
        .into_iter()
        .filter(ScannedPort::is_teensy_candidate)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(path: &str, description: &str, vid: Option<u16>) -> ScannedPort {
        ScannedPort {
            path: path.into(),
            description: description.into(),
            vid,
            pid: vid.map(|_| 0x0483),
            serial_number: None,
        }
    }

    #[test]
    fn test_teensy_vid_is_candidate() {
        assert!(port("/dev/ttyACM0", "USB Serial", Some(0x16C0)).is_teensy_candidate());
    }

    #[test]
    fn test_description_match_is_candidate() {
        assert!(port("/dev/ttyACM1", "Teensy 4.1", None).is_teensy_candidate());
        assert!(port("/dev/cu.usbmodem158960201", "USBmodem Serial", None).is_teensy_candidate());
        // The device path alone is not enough; the description decides
        assert!(!port("/dev/cu.usbmodem158960201", "FTDI FT232R", None).is_teensy_candidate());
    }

    #[test]
    fn test_unrelated_port_is_not_candidate() {
        assert!(!port("/dev/ttyS0", "16550A UART", None).is_teensy_candidate());
        assert!(!port("/dev/ttyUSB0", "FTDI FT232R", Some(0x0403)).is_teensy_candidate());
    }
}
