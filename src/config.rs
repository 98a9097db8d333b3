//! Device catalog and service configuration
//!
//! The device table is the single source of truth for how each accelerator
//! board is found, identified, flashed, and reset. Sessions receive a
//! read-only copy of their entry; the manager owns the full catalog.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Logical device types hosted on the testbed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Ldpc,
    Sat,
    Ksat,
}

impl DeviceType {
    pub const ALL: [DeviceType; 3] = [DeviceType::Ldpc, DeviceType::Sat, DeviceType::Ksat];

    /// Lowercase wire/route name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Ldpc => "ldpc",
            DeviceType::Sat => "sat",
            DeviceType::Ksat => "ksat",
        }
    }

    /// Uppercase chip label used in persisted test rows
    pub fn chip_label(&self) -> &'static str {
        match self {
            DeviceType::Ldpc => "LDPC",
            DeviceType::Sat => "SAT",
            DeviceType::Ksat => "KSAT",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ldpc" => Ok(DeviceType::Ldpc),
            "sat" => Ok(DeviceType::Sat),
            "ksat" => Ok(DeviceType::Ksat),
            other => Err(format!("unknown device type: {other}")),
        }
    }
}

/// Static configuration for one device type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Ports to try before falling back to discovery
    pub preferred_ports: Vec<String>,

    /// Banner substrings that confirm the firmware booted
    pub startup_messages: Vec<String>,

    /// Keywords expected in a STATUS probe response
    pub identification_keywords: Vec<String>,

    /// PlatformIO project directory
    pub firmware_path: String,

    /// PlatformIO environment name
    pub firmware_env: String,

    /// GPIO line driving the board's active-low reset
    pub reset_gpio_pin: u8,

    /// LED command sent on clean session close
    pub idle_led_command: String,
}

/// Read-only table of device configurations
#[derive(Debug, Clone)]
pub struct DeviceCatalog {
    configs: HashMap<DeviceType, DeviceConfig>,
}

impl DeviceCatalog {
    pub fn get(&self, device: DeviceType) -> &DeviceConfig {
        // The catalog always carries every variant of the closed set.
        &self.configs[&device]
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceType, &DeviceConfig)> {
        DeviceType::ALL.iter().map(move |d| (*d, &self.configs[d]))
    }
}

impl Default for DeviceCatalog {
    fn default() -> Self {
        let mut configs = HashMap::new();

        configs.insert(
            DeviceType::Ldpc,
            DeviceConfig {
                preferred_ports: vec![
                    "/dev/ttyACM0".into(),
                    "/dev/cu.usbmodem158960201".into(),
                    "/dev/tty.usbmodem158960201".into(),
                ],
                startup_messages: vec![
                    "AMORGOS LDPC Decoder Ready".into(),
                    "STATUS:READY".into(),
                ],
                identification_keywords: vec!["AMORGOS".into(), "LDPC".into()],
                firmware_path: "firmware/LDPC_TEENSY".into(),
                firmware_env: "teensy41".into(),
                reset_gpio_pin: 18,
                idle_led_command: "LED:IDLE".into(),
            },
        );

        configs.insert(
            DeviceType::Sat,
            DeviceConfig {
                preferred_ports: vec![
                    "/dev/ttyACM1".into(),
                    "/dev/cu.usbmodem138999801".into(),
                    "/dev/cu.usbmodem139000201".into(),
                ],
                startup_messages: vec![
                    "DAEDALUS 3-SAT Solver".into(),
                    "STATUS:READY".into(),
                ],
                identification_keywords: vec!["DAEDALUS".into(), "3-SAT".into()],
                firmware_path: "firmware/3SAT_TEENSY".into(),
                firmware_env: "teensy41".into(),
                reset_gpio_pin: 19,
                idle_led_command: "LED:OFF".into(),
            },
        );

        configs.insert(
            DeviceType::Ksat,
            DeviceConfig {
                preferred_ports: vec!["/dev/cu.usbmodem140001201".into()],
                startup_messages: vec![
                    "MEDUSA K-SAT Solver".into(),
                    "STATUS:READY".into(),
                ],
                identification_keywords: vec!["MEDUSA".into(), "K-SAT".into()],
                firmware_path: "firmware/KSAT_TEENSY".into(),
                firmware_env: "teensy41".into(),
                reset_gpio_pin: 20,
                idle_led_command: "LED:OFF".into(),
            },
        );

        DeviceCatalog { configs }
    }
}

/// Process-level configuration shared by both services
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Port to bind the HTTP listener on
    pub port: u16,

    /// Origins allowed to make credentialed cross-origin requests
    pub allowed_origins: Vec<String>,

    /// Google OAuth client id used as the token audience
    pub google_client_id: Option<String>,

    /// Enables the unverified-token auth fallback. Never set in production.
    pub dev_mode: bool,

    /// SQLite database path (data service)
    pub db_path: String,

    /// Base URL of the hardware service (data service LDPC jobs)
    pub hardware_api_url: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from the environment with the given default port
    pub fn from_env(default_port: u16) -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(default_port);

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let dev_mode = env::var("DACROQ_ENV")
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        ServiceConfig {
            port,
            allowed_origins,
            google_client_id: env::var("GOOGLE_CLIENT_ID").ok(),
            dev_mode,
            db_path: env::var("DACROQ_DB").unwrap_or_else(|_| "dacroq.db".into()),
            hardware_api_url: env::var("HARDWARE_API_URL").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_round_trip() {
        for device in DeviceType::ALL {
            let parsed: DeviceType = device.as_str().parse().unwrap();
            assert_eq!(parsed, device);
        }
        assert!("fpga".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_catalog_covers_all_types() {
        let catalog = DeviceCatalog::default();
        assert_eq!(catalog.get(DeviceType::Ldpc).reset_gpio_pin, 18);
        assert_eq!(catalog.get(DeviceType::Sat).reset_gpio_pin, 19);
        assert_eq!(catalog.get(DeviceType::Ksat).reset_gpio_pin, 20);
        assert_eq!(catalog.iter().count(), 3);
    }

    #[test]
    fn test_idle_led_commands() {
        let catalog = DeviceCatalog::default();
        assert_eq!(catalog.get(DeviceType::Ldpc).idle_led_command, "LED:IDLE");
        assert_eq!(catalog.get(DeviceType::Sat).idle_led_command, "LED:OFF");
    }
}
