//! Interface to Apple's `xcrun simctl` command-line tool.
//!
//! Lists simulators, boots and shuts them down, and clears leftover
//! simulator processes after a shutdown.
//!
//! # Requirements
//!
//! Xcode must be installed for `xcrun simctl` to be available.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mobrig_core::command::SystemRunner;
//! use mobrig_core::simctl::{shutdown_booted_simulator, Simctl};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let simctl = Simctl::new(&SystemRunner);
//! for device in simctl.list_devices().await? {
//!     println!("{}: {} ({})", device.name, device.udid, device.state);
//! }
//!
//! shutdown_booted_simulator(&SystemRunner, Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::command::{CommandError, CommandRunner, CommandSpec};

/// Grace period between the simctl shutdown and killing leftover processes.
pub const SIMULATOR_GRACE: Duration = Duration::from_secs(5);

/// Errors that can occur when interacting with simctl.
#[derive(Error, Debug)]
pub enum SimctlError {
    /// A simctl command failed to run or exited unsuccessfully.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// No simulator is currently in the "Booted" state.
    #[error("No booted simulator found")]
    NoBootedSimulator,

    /// Failed to parse JSON output from simctl.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// An iOS Simulator device as reported by `xcrun simctl list devices -j`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorDevice {
    pub udid: String,

    /// Human-readable name, e.g. "iPhone 15 Pro".
    pub name: String,

    /// "Booted", "Shutdown", ...
    pub state: String,

    #[serde(rename = "deviceTypeIdentifier")]
    pub device_type: Option<String>,
}

impl SimulatorDevice {
    pub fn is_booted(&self) -> bool {
        self.state == "Booted"
    }
}

#[derive(Debug, Deserialize)]
struct DeviceList {
    devices: HashMap<String, Vec<SimulatorDevice>>,
}

/// Flattens `simctl list devices -j` output across all runtimes.
pub fn parse_device_list(json: &[u8]) -> Result<Vec<SimulatorDevice>, SimctlError> {
    let list: DeviceList = serde_json::from_slice(json)?;
    Ok(list.devices.into_values().flatten().collect())
}

/// First device in the "Booted" state.
pub fn find_booted_device(devices: &[SimulatorDevice]) -> Option<&SimulatorDevice> {
    devices.iter().find(|d| d.is_booted())
}

fn xcrun<'a>(args: impl IntoIterator<Item = &'a str>) -> CommandSpec {
    CommandSpec::new("xcrun").arg("simctl").args(args)
}

/// `xcrun simctl` bound to a command runner.
pub struct Simctl<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Simctl<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Lists every simulator across all installed runtimes.
    pub async fn list_devices(&self) -> Result<Vec<SimulatorDevice>, SimctlError> {
        let spec = xcrun(["list", "devices", "-j"]);
        let output = self.runner.output(&spec).await?.into_result(&spec)?;
        parse_device_list(output.stdout.as_bytes())
    }

    /// UDID of the first booted simulator.
    pub async fn booted_udid(&self) -> Result<String, SimctlError> {
        let devices = self.list_devices().await?;
        find_booted_device(&devices)
            .map(|d| d.udid.clone())
            .ok_or(SimctlError::NoBootedSimulator)
    }

    /// Boots a simulator. Already booted is not an error.
    pub async fn boot(&self, udid: &str) -> Result<(), SimctlError> {
        let spec = xcrun(["boot", udid]);
        let output = self.runner.output(&spec).await?;
        if !output.success() && !output.stderr.contains("current state: Booted") {
            output.into_result(&spec)?;
        }
        Ok(())
    }

    /// Shuts a simulator down. Already shut down is not an error.
    pub async fn shutdown(&self, udid: &str) -> Result<(), SimctlError> {
        let spec = xcrun(["shutdown", udid]);
        let output = self.runner.output(&spec).await?;
        if !output.success() && !output.stderr.contains("current state: Shutdown") {
            output.into_result(&spec)?;
        }
        Ok(())
    }
}

/// Shuts down the booted simulator and clears leftover simulator processes.
///
/// When nothing is booted the shutdown is skipped. After `grace`, the
/// Simulator app is force-killed; a failing `killall` only means there was
/// nothing left to kill.
#[instrument(skip(runner))]
pub async fn shutdown_booted_simulator(
    runner: &dyn CommandRunner,
    grace: Duration,
) -> Result<(), SimctlError> {
    let simctl = Simctl::new(runner);
    let devices = simctl.list_devices().await?;

    match find_booted_device(&devices) {
        Some(device) => {
            info!(udid = %device.udid, name = %device.name, "shutting down simulator");
            simctl.shutdown(&device.udid).await?;
        }
        None => info!("no booted simulator to shut down"),
    }

    tokio::time::sleep(grace).await;

    let spec = CommandSpec::new("killall").args(["-9", "Simulator"]);
    match runner.output(&spec).await {
        Ok(output) if output.success() => info!("killed leftover Simulator processes"),
        Ok(output) => debug!(stderr = %output.stderr.trim(), "no Simulator processes left"),
        Err(e) => debug!(error = %e, "killall unavailable"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sample JSON matching actual simctl output format
    const SAMPLE_DEVICE_LIST: &str = r#"{
        "devices": {
            "com.apple.CoreSimulator.SimRuntime.iOS-17-0": [
                {
                    "udid": "A1B2C3D4-E5F6-7890-ABCD-EF1234567890",
                    "name": "iPhone 15 Pro",
                    "state": "Booted",
                    "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-15-Pro"
                },
                {
                    "udid": "B2C3D4E5-F6A7-8901-BCDE-F12345678901",
                    "name": "iPhone 15",
                    "state": "Shutdown"
                }
            ],
            "com.apple.CoreSimulator.SimRuntime.iOS-16-4": [
                {
                    "udid": "C3D4E5F6-A7B8-9012-CDEF-123456789012",
                    "name": "iPhone 14",
                    "state": "Shutdown"
                }
            ]
        }
    }"#;

    #[test]
    fn parses_devices_across_runtimes() {
        let devices = parse_device_list(SAMPLE_DEVICE_LIST.as_bytes()).unwrap();
        assert_eq!(devices.len(), 3);
        let booted = find_booted_device(&devices).unwrap();
        assert_eq!(booted.name, "iPhone 15 Pro");
        assert!(booted.device_type.as_deref().unwrap().contains("iPhone-15-Pro"));
    }

    #[test]
    fn empty_list_has_no_booted_device() {
        let devices = parse_device_list(br#"{"devices": {}}"#).unwrap();
        assert!(devices.is_empty());
        assert!(find_booted_device(&devices).is_none());
    }

    #[test]
    fn invalid_json_is_parse_error() {
        assert!(matches!(
            parse_device_list(b"not valid json"),
            Err(SimctlError::JsonParse(_))
        ));
        assert!(parse_device_list(br#"{"something_else": []}"#).is_err());
    }

    #[test]
    fn xcrun_prefixes_simctl() {
        assert_eq!(xcrun(["shutdown", "ABC"]).to_string(), "xcrun simctl shutdown ABC");
    }

    #[test]
    fn error_display() {
        assert!(SimctlError::NoBootedSimulator
            .to_string()
            .contains("No booted simulator"));
    }
}
