//! Firmware build and upload via the external PlatformIO toolchain
//!
//! Each device type has its own PlatformIO project directory. The driver
//! shells out to `pio`, bounds every invocation with a kill deadline, and
//! clears the port registration after a successful upload so discovery sees
//! the rebooted board.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::config::DeviceType;
use crate::hardware::manager::{DeviceManager, PortFinder};
use crate::hardware::{HardwareError, HardwareResult};

/// Kill deadline for a firmware build
const BUILD_TIMEOUT: Duration = Duration::from_secs(300);

/// Kill deadline for a firmware upload
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Boot wait after flashing before the caller should re-discover
const REBOOT_WAIT: Duration = Duration::from_secs(3);

/// Captured result of one toolchain invocation
#[derive(Debug, Clone, Serialize)]
pub struct ToolchainOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a combined build + upload
#[derive(Debug, Clone, Serialize)]
pub struct FlashOutcome {
    pub device_type: String,
    pub success: bool,
    pub steps: Vec<FlashStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlashStep {
    pub step: String,
    pub result: ToolchainOutcome,
}

pub struct FirmwareDriver {
    manager: Arc<DeviceManager>,
}

impl FirmwareDriver {
    pub fn new(manager: Arc<DeviceManager>) -> Self {
        FirmwareDriver { manager }
    }

    async fn run_pio(&self, args: &[&str], deadline: Duration) -> HardwareResult<ToolchainOutcome> {
        let mut cmd = Command::new("pio");
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(deadline, cmd.output())
            .await
            .map_err(|_| {
                HardwareError::Timeout(format!(
                    "pio {} exceeded {}s",
                    args.join(" "),
                    deadline.as_secs()
                ))
            })?
            .map_err(|e| HardwareError::Firmware(format!("failed to run pio: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let success = output.status.success();

        Ok(ToolchainOutcome {
            success,
            stdout,
            stderr,
            port: None,
            error: if success {
                None
            } else {
                Some(format!("pio exited with status {}", output.status))
            },
        })
    }

    /// Build firmware for one device type
    pub async fn build(&self, device: DeviceType) -> HardwareResult<ToolchainOutcome> {
        let config = self.manager.catalog().get(device).clone();
        tracing::info!("Building {} firmware in {}", device, config.firmware_path);

        let outcome = self
            .run_pio(
                &["run", "-d", &config.firmware_path, "-e", &config.firmware_env],
                BUILD_TIMEOUT,
            )
            .await?;

        if outcome.success {
            tracing::info!("Built {} firmware", device);
        } else {
            tracing::error!("Failed to build {} firmware", device);
        }
        Ok(outcome)
    }

    /// Upload firmware, clearing the port registration on success
    pub async fn upload(
        &self,
        device: DeviceType,
        port: Option<String>,
    ) -> HardwareResult<ToolchainOutcome> {
        let config = self.manager.catalog().get(device).clone();
        let target_port = match port.or_else(|| self.manager.discovered_port(device)) {
            Some(port) => port,
            None => self
                .manager
                .candidates(device)
                .into_iter()
                .next()
                .ok_or_else(|| HardwareError::NoPort(device.to_string()))?,
        };

        tracing::info!("Uploading {} firmware to {}", device, target_port);
        let mut outcome = self
            .run_pio(
                &[
                    "run",
                    "-d",
                    &config.firmware_path,
                    "-e",
                    &config.firmware_env,
                    "-t",
                    "upload",
                    "--upload-port",
                    &target_port,
                ],
                UPLOAD_TIMEOUT,
            )
            .await?;
        outcome.port = Some(target_port.clone());

        if outcome.success {
            tracing::info!("Uploaded {} firmware to {}", device, target_port);
            // The board reboots into new firmware; force re-discovery
            self.manager.unregister_port(&target_port);
        } else {
            tracing::error!("Failed to upload {} firmware", device);
        }
        Ok(outcome)
    }

    /// Build and upload in one operation, then wait for the board to reboot
    pub async fn flash(
        &self,
        device: DeviceType,
        port: Option<String>,
        build_first: bool,
    ) -> HardwareResult<FlashOutcome> {
        tracing::info!("Starting firmware flash for {}", device);
        let mut steps = Vec::new();

        if build_first {
            let build = self.build(device).await?;
            let failed = !build.success;
            let error = build.error.clone();
            steps.push(FlashStep {
                step: "build".into(),
                result: build,
            });
            if failed {
                return Ok(FlashOutcome {
                    device_type: device.to_string(),
                    success: false,
                    steps,
                    port: None,
                    error: error.map(|e| format!("Build failed: {e}")),
                });
            }
        }

        let upload = self.upload(device, port).await?;
        let success = upload.success;
        let upload_port = upload.port.clone();
        let error = upload.error.clone();
        steps.push(FlashStep {
            step: "upload".into(),
            result: upload,
        });

        if success {
            tracing::info!("Flashed {} firmware", device);
            tokio::time::sleep(REBOOT_WAIT).await;
        }

        Ok(FlashOutcome {
            device_type: device.to_string(),
            success,
            steps,
            port: upload_port,
            error: error.map(|e| format!("Upload failed: {e}")),
        })
    }
}
