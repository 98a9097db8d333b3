//! GPIO reset control for the accelerator boards
//!
//! Each board exposes an active-low reset line wired to a GPIO pin on the
//! lab host. The controller claims every configured line as an output held
//! HIGH; a reset pulses the line LOW and then waits for USB re-enumeration.
//! On hosts without GPIO hardware the controller reports itself unavailable
//! and every reset fails cleanly instead of crashing the service.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rppal::gpio::{Gpio, OutputPin};
use serde::Serialize;

use crate::config::{DeviceCatalog, DeviceType};
use crate::hardware::{HardwareError, HardwareResult};

/// Reset pulse width (active-low)
const RESET_PULSE: Duration = Duration::from_millis(1500);

/// Wait after releasing reset for the board to boot and re-enumerate
const BOOT_WAIT: Duration = Duration::from_secs(3);

/// Per-device pin state report
#[derive(Debug, Clone, Serialize)]
pub struct PinStatus {
    pub gpio_pin: u8,
    pub current_state: String,
    pub raw_value: u8,
}

struct ClaimedLines {
    lines: HashMap<DeviceType, OutputPin>,
}

/// Controller for the boards' reset lines
pub struct GpioResetController {
    inner: Option<Mutex<ClaimedLines>>,
}

impl GpioResetController {
    /// Claim every configured reset line as an output driven HIGH.
    ///
    /// Initialization failure is not fatal: the controller comes up
    /// unavailable and callers get `GpioUnavailable` on reset attempts.
    pub fn new(catalog: &DeviceCatalog) -> Self {
        let gpio = match Gpio::new() {
            Ok(gpio) => gpio,
            Err(e) => {
                tracing::warn!("GPIO unavailable, hardware reset disabled: {}", e);
                return GpioResetController { inner: None };
            }
        };

        let mut lines = HashMap::new();
        for (device, config) in catalog.iter() {
            match gpio.get(config.reset_gpio_pin) {
                Ok(pin) => {
                    let mut output = pin.into_output_high();
                    output.set_reset_on_drop(false);
                    tracing::info!(
                        "GPIO {} claimed for {} reset control",
                        config.reset_gpio_pin,
                        device
                    );
                    lines.insert(device, output);
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to claim GPIO {} for {}: {}",
                        config.reset_gpio_pin,
                        device,
                        e
                    );
                    return GpioResetController { inner: None };
                }
            }
        }

        tracing::info!("GPIO hardware reset control initialized");
        GpioResetController {
            inner: Some(Mutex::new(ClaimedLines { lines })),
        }
    }

    /// Construct an unavailable controller (used on non-lab hosts and in tests)
    pub fn unavailable() -> Self {
        GpioResetController { inner: None }
    }

    pub fn available(&self) -> bool {
        self.inner.is_some()
    }

    /// Pulse one device's reset line LOW, then wait for it to boot
    pub fn reset(&self, device: DeviceType) -> HardwareResult<u8> {
        let inner = self.inner.as_ref().ok_or(HardwareError::GpioUnavailable)?;
        let mut claimed = inner.lock();
        let line = claimed
            .lines
            .get_mut(&device)
            .ok_or_else(|| HardwareError::UnknownDevice(device.to_string()))?;

        let pin = line.pin();
        tracing::info!("Hardware reset of {} via GPIO {}", device, pin);
        line.set_low();
        thread::sleep(RESET_PULSE);
        line.set_high();
        thread::sleep(BOOT_WAIT);

        Ok(pin)
    }

    /// Pull every reset line LOW simultaneously, release them together,
    /// then wait once for all boards to boot
    pub fn reset_all(&self) -> HardwareResult<Vec<(DeviceType, u8)>> {
        let inner = self.inner.as_ref().ok_or(HardwareError::GpioUnavailable)?;
        let mut claimed = inner.lock();

        tracing::info!("Hardware reset of ALL devices");
        for line in claimed.lines.values_mut() {
            line.set_low();
        }
        thread::sleep(RESET_PULSE);
        for line in claimed.lines.values_mut() {
            line.set_high();
        }
        thread::sleep(BOOT_WAIT);

        Ok(claimed
            .lines
            .iter()
            .map(|(device, line)| (*device, line.pin()))
            .collect())
    }

    /// Current value of one device's reset line
    pub fn pin_state(&self, device: DeviceType) -> HardwareResult<PinStatus> {
        let inner = self.inner.as_ref().ok_or(HardwareError::GpioUnavailable)?;
        let claimed = inner.lock();
        let line = claimed
            .lines
            .get(&device)
            .ok_or_else(|| HardwareError::UnknownDevice(device.to_string()))?;

        let high = line.is_set_high();
        Ok(PinStatus {
            gpio_pin: line.pin(),
            current_state: if high {
                "HIGH (inactive)".into()
            } else {
                "LOW (active)".into()
            },
            raw_value: high as u8,
        })
    }

    /// Status report for every claimed line
    pub fn status(&self) -> serde_json::Value {
        match &self.inner {
            None => serde_json::json!({
                "available": false,
                "reason": "GPIO initialization failed or hardware absent",
            }),
            Some(inner) => {
                let claimed = inner.lock();
                let mut pins = serde_json::Map::new();
                for (device, line) in &claimed.lines {
                    let high = line.is_set_high();
                    pins.insert(
                        device.to_string(),
                        serde_json::json!({
                            "gpio_pin": line.pin(),
                            "current_state": if high { "HIGH (inactive)" } else { "LOW (active)" },
                            "raw_value": high as u8,
                        }),
                    );
                }
                serde_json::json!({
                    "available": true,
                    "initialized": true,
                    "pin_status": pins,
                })
            }
        }
    }

    /// Restore every line HIGH and release the chip
    pub fn close(&self) {
        if let Some(inner) = &self.inner {
            let mut claimed = inner.lock();
            for line in claimed.lines.values_mut() {
                line.set_high();
            }
            claimed.lines.clear();
            tracing::info!("GPIO resources released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_controller_fails_cleanly() {
        let gpio = GpioResetController::unavailable();
        assert!(!gpio.available());
        assert!(matches!(
            gpio.reset(DeviceType::Ldpc),
            Err(HardwareError::GpioUnavailable)
        ));
        assert!(matches!(
            gpio.reset_all(),
            Err(HardwareError::GpioUnavailable)
        ));
        assert!(matches!(
            gpio.pin_state(DeviceType::Sat),
            Err(HardwareError::GpioUnavailable)
        ));
    }

    #[test]
    fn test_unavailable_status_shape() {
        let gpio = GpioResetController::unavailable();
        let status = gpio.status();
        assert_eq!(status["available"], false);
    }
}
