//! Central device manager
//!
//! Owns the port-registration maps, the device catalog, and the GPIO reset
//! controller. Discovery probes candidate ports, identifies which firmware
//! answers, and registers the port exclusively for that device type.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::{DeviceCatalog, DeviceType};
use crate::gpio::GpioResetController;
use crate::hardware::history::HistoryRing;
use crate::hardware::link::SerialLink;
use crate::hardware::scanner;
use crate::hardware::{HardwareError, HardwareResult};

/// How long the firmware gets to settle after an identification open
const PROBE_SETTLE: Duration = Duration::from_millis(300);

/// Window for collecting identification responses
const PROBE_WINDOW: Duration = Duration::from_millis(700);

/// Port-selection capability handed to sessions.
///
/// Sessions only ever see this narrow view; registration flows back through
/// `reserve`/`release` so the exclusivity discipline stays in one place.
pub trait PortFinder: Send + Sync {
    /// Candidate ports for a device type, in priority order
    fn candidates(&self, device: DeviceType) -> Vec<String>;

    /// Claim a port exclusively for a device type
    fn reserve(&self, port: &str, device: DeviceType) -> HardwareResult<()>;

    /// Free a port registration
    fn release(&self, port: &str);
}

#[derive(Default)]
struct Registrations {
    /// port path → owning device type
    active_ports: HashMap<String, DeviceType>,
    /// device type → currently discovered port
    discovered: HashMap<DeviceType, String>,
}

/// Outcome of a GPIO-backed device reset
#[derive(Debug, Clone, Serialize)]
pub struct ResetOutcome {
    pub success: bool,
    pub device: String,
    pub gpio_pin: u8,
    pub message: String,
}

pub struct DeviceManager {
    catalog: DeviceCatalog,
    registrations: Mutex<Registrations>,
    gpio: GpioResetController,
}

impl DeviceManager {
    pub fn new(catalog: DeviceCatalog) -> Self {
        let gpio = GpioResetController::new(&catalog);
        DeviceManager {
            catalog,
            registrations: Mutex::new(Registrations::default()),
            gpio,
        }
    }

    /// Construct with an explicit GPIO controller (tests, non-lab hosts)
    pub fn with_gpio(catalog: DeviceCatalog, gpio: GpioResetController) -> Self {
        DeviceManager {
            catalog,
            registrations: Mutex::new(Registrations::default()),
            gpio,
        }
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    pub fn gpio(&self) -> &GpioResetController {
        &self.gpio
    }

    /// Register a port for a device type; fails if another type owns it
    pub fn register_port(&self, port: &str, device: DeviceType) -> HardwareResult<()> {
        let mut regs = self.registrations.lock();
        if let Some(owner) = regs.active_ports.get(port) {
            if *owner != device {
                tracing::warn!(
                    "Port {} already in use by {}, requested by {}",
                    port,
                    owner,
                    device
                );
                return Err(HardwareError::PortConflict {
                    port: port.to_string(),
                    owner: owner.to_string(),
                });
            }
        }
        regs.active_ports.insert(port.to_string(), device);
        regs.discovered.insert(device, port.to_string());
        tracing::info!("Registered port {} for {} device", port, device);
        Ok(())
    }

    /// Drop a port registration and the matching discovery entry
    pub fn unregister_port(&self, port: &str) {
        let mut regs = self.registrations.lock();
        if let Some(device) = regs.active_ports.remove(port) {
            if regs.discovered.get(&device).map(String::as_str) == Some(port) {
                regs.discovered.remove(&device);
            }
            tracing::info!("Unregistered port {} from {} device", port, device);
        }
    }

    pub fn is_port_available(&self, port: &str, device: DeviceType) -> bool {
        let regs = self.registrations.lock();
        match regs.active_ports.get(port) {
            None => true,
            Some(owner) => *owner == device,
        }
    }

    /// Currently discovered port for a device type
    pub fn discovered_port(&self, device: DeviceType) -> Option<String> {
        self.registrations.lock().discovered.get(&device).cloned()
    }

    /// Probe every Teensy-candidate port and register what answers.
    ///
    /// Runs at startup and on explicit request; converges to the same map
    /// for identical hardware state.
    pub fn discover_all(&self) -> HashMap<DeviceType, String> {
        tracing::info!("Starting device auto-discovery");
        let mut discovered = HashMap::new();

        for port in scanner::teensy_candidates() {
            if let Some(device) = self.identify_port(&port.path) {
                if self.register_port(&port.path, device).is_ok() {
                    tracing::info!("Discovered {} device at {}", device, port.path);
                    discovered.insert(device, port.path.clone());
                }
            }
        }

        tracing::info!(
            "Discovery complete: {:?}",
            discovered.keys().map(|d| d.as_str()).collect::<Vec<_>>()
        );
        discovered
    }

    /// Short identification probe: open, STATUS, match keywords.
    fn identify_port(&self, path: &str) -> Option<DeviceType> {
        let response = match self.probe_status(path) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Failed to probe {}: {}", path, e);
                return None;
            }
        };
        tracing::debug!("Device at {} responded: {}", path, response);

        for (device, config) in self.catalog.iter() {
            if config
                .identification_keywords
                .iter()
                .any(|kw| response.contains(kw.as_str()))
            {
                return Some(device);
            }
        }

        // Generic firmware answer; disambiguate by the port-path serial
        // fragment. This heuristic is kept for backward compatibility with
        // boards that predate the identification keywords.
        if response.contains("STATUS:READY") {
            let guess = self.guess_by_port_path(path);
            if let Some(device) = guess {
                tracing::warn!(
                    "Generic STATUS:READY at {}; assuming {} from port path",
                    path,
                    device
                );
            }
            return guess;
        }

        tracing::warn!("Could not identify device at {}: {}", path, response);
        None
    }

    fn guess_by_port_path(&self, path: &str) -> Option<DeviceType> {
        if path.contains("158960") {
            Some(DeviceType::Ldpc)
        } else if path.contains("138999") || path.contains("139000") {
            Some(DeviceType::Sat)
        } else if path.contains("140001") {
            Some(DeviceType::Ksat)
        } else {
            None
        }
    }

    fn probe_status(&self, path: &str) -> HardwareResult<String> {
        let scratch = Arc::new(HistoryRing::new());
        let mut link = SerialLink::open(path, scratch)?;
        thread::sleep(Duration::from_millis(200));
        link.clear_buffers()?;
        link.write_line("STATUS")?;
        thread::sleep(PROBE_SETTLE);

        let mut lines = Vec::new();
        let deadline = Instant::now() + PROBE_WINDOW;
        while link.bytes_available() && Instant::now() < deadline {
            let line = link.read_line(Duration::from_millis(200))?;
            if line.is_empty() {
                break;
            }
            lines.push(line);
        }
        Ok(lines.join(" "))
    }

    /// GPIO reset of one device, then clear its registrations so the next
    /// acquisition re-discovers the rebooted board
    pub fn reset_device(&self, device: DeviceType) -> HardwareResult<ResetOutcome> {
        let pin = self.gpio.reset(device)?;
        self.clear_device(device);
        Ok(ResetOutcome {
            success: true,
            device: device.to_string(),
            gpio_pin: pin,
            message: format!("Hardware reset completed for {device}"),
        })
    }

    /// Simultaneous GPIO reset of every device, clearing all registrations
    pub fn reset_all(&self) -> HardwareResult<Vec<ResetOutcome>> {
        let pins = self.gpio.reset_all()?;
        {
            let mut regs = self.registrations.lock();
            regs.active_ports.clear();
            regs.discovered.clear();
        }
        Ok(pins
            .into_iter()
            .map(|(device, pin)| ResetOutcome {
                success: true,
                device: device.to_string(),
                gpio_pin: pin,
                message: format!("Hardware reset completed for {device}"),
            })
            .collect())
    }

    fn clear_device(&self, device: DeviceType) {
        let mut regs = self.registrations.lock();
        regs.discovered.remove(&device);
        regs.active_ports.retain(|_, owner| *owner != device);
    }

    /// Snapshot of the registration maps
    pub fn status(&self) -> serde_json::Value {
        let regs = self.registrations.lock();
        let active: HashMap<&str, &str> = regs
            .active_ports
            .iter()
            .map(|(port, device)| (port.as_str(), device.as_str()))
            .collect();
        let discovered: HashMap<&str, &str> = regs
            .discovered
            .iter()
            .map(|(device, port)| (device.as_str(), port.as_str()))
            .collect();
        serde_json::json!({
            "active_ports": active,
            "discovered_devices": discovered,
            "total_devices": regs.active_ports.len(),
        })
    }
}

impl PortFinder for DeviceManager {
    fn candidates(&self, device: DeviceType) -> Vec<String> {
        let mut ports = Vec::new();

        // Already-discovered port first
        if let Some(port) = self.discovered_port(device) {
            ports.push(port);
        }

        // Configured preferred ports next
        for port in &self.catalog.get(device).preferred_ports {
            if self.is_port_available(port, device) && !ports.contains(port) {
                ports.push(port.clone());
            }
        }

        // Any Teensy candidate not owned by another type
        for scanned in scanner::teensy_candidates() {
            if self.is_port_available(&scanned.path, device) && !ports.contains(&scanned.path) {
                ports.push(scanned.path);
            }
        }

        ports
    }

    fn reserve(&self, port: &str, device: DeviceType) -> HardwareResult<()> {
        self.register_port(port, device)
    }

    fn release(&self, port: &str) {
        self.unregister_port(port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> DeviceManager {
        DeviceManager::with_gpio(DeviceCatalog::default(), GpioResetController::unavailable())
    }

    #[test]
    fn test_register_is_exclusive() {
        let mgr = manager();
        mgr.register_port("/dev/ttyACM0", DeviceType::Ldpc).unwrap();

        // Same type may re-register
        mgr.register_port("/dev/ttyACM0", DeviceType::Ldpc).unwrap();

        // Another type is rejected
        let err = mgr.register_port("/dev/ttyACM0", DeviceType::Sat).unwrap_err();
        assert!(matches!(err, HardwareError::PortConflict { .. }));
    }

    #[test]
    fn test_unregister_clears_both_maps() {
        let mgr = manager();
        mgr.register_port("/dev/ttyACM0", DeviceType::Ldpc).unwrap();
        assert_eq!(
            mgr.discovered_port(DeviceType::Ldpc).as_deref(),
            Some("/dev/ttyACM0")
        );

        mgr.unregister_port("/dev/ttyACM0");
        assert!(mgr.discovered_port(DeviceType::Ldpc).is_none());
        assert!(mgr.is_port_available("/dev/ttyACM0", DeviceType::Sat));
    }

    #[test]
    fn test_reset_requires_gpio() {
        let mgr = manager();
        mgr.register_port("/dev/ttyACM0", DeviceType::Ldpc).unwrap();
        assert!(matches!(
            mgr.reset_device(DeviceType::Ldpc),
            Err(HardwareError::GpioUnavailable)
        ));
        // Failed reset must not clear the registration
        assert_eq!(
            mgr.discovered_port(DeviceType::Ldpc).as_deref(),
            Some("/dev/ttyACM0")
        );
    }

    #[test]
    fn test_port_path_guess() {
        let mgr = manager();
        assert_eq!(
            mgr.guess_by_port_path("/dev/cu.usbmodem158960201"),
            Some(DeviceType::Ldpc)
        );
        assert_eq!(
            mgr.guess_by_port_path("/dev/cu.usbmodem138999801"),
            Some(DeviceType::Sat)
        );
        assert_eq!(
            mgr.guess_by_port_path("/dev/cu.usbmodem140001201"),
            Some(DeviceType::Ksat)
        );
        assert_eq!(mgr.guess_by_port_path("/dev/ttyACM9"), None);
    }

    #[test]
    fn test_candidates_prefer_discovered_port() {
        let mgr = manager();
        mgr.register_port("/dev/ttyACM7", DeviceType::Ldpc).unwrap();
        let candidates = mgr.candidates(DeviceType::Ldpc);
        assert_eq!(candidates.first().map(String::as_str), Some("/dev/ttyACM7"));
        // Preferred ports follow without duplicates
        assert!(candidates.contains(&"/dev/ttyACM0".to_string()));
    }

    #[test]
    fn test_status_shape() {
        let mgr = manager();
        mgr.register_port("/dev/ttyACM0", DeviceType::Ldpc).unwrap();
        let status = mgr.status();
        assert_eq!(status["total_devices"], 1);
        assert_eq!(status["active_ports"]["/dev/ttyACM0"], "ldpc");
        assert_eq!(status["discovered_devices"]["ldpc"], "/dev/ttyACM0");
    }
}
