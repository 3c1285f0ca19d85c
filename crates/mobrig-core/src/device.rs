//! Android emulator and Genymotion VM control.
//!
//! Devices are launched as detached processes and then polled over `adb`
//! until the boot animation has stopped. Kill operations find the device
//! process by name in the process table and send the host's kill command.
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use mobrig_core::command::SystemRunner;
//! use mobrig_core::device::AndroidEmulator;
//! use mobrig_core::process::SystemProcessTable;
//! use mobrig_core::retry::PollPolicy;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let emulator = AndroidEmulator::from_env("Pixel_7_API_34")?;
//! emulator
//!     .launch(&SystemRunner, &SystemProcessTable, &PollPolicy::boot(), &CancellationToken::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::command::{CommandError, CommandRunner, CommandSpec};
use crate::host::HostOs;
use crate::process::{find_by_cmdline, kill_pid, ProcessTable};
use crate::retry::{poll_until, Poll, PollError, PollPolicy};

const BOOT_PROPERTY: &str = "init.svc.bootanim";

/// Errors from device control.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The boot animation never reported "stopped".
    #[error("device did not finish booting after {attempts} attempts")]
    BootTimeout { attempts: u32 },

    /// Boot polling was cancelled by the caller.
    #[error("boot check cancelled")]
    Cancelled,

    /// No process matched the device name.
    #[error("cannot find PID for {0}")]
    PidNotFound(String),

    /// Neither `ANDROID_HOME` nor `ANDROID_SDK_ROOT` is set.
    #[error("ANDROID_HOME is not set")]
    AndroidHomeUnset,

    /// The operation has no implementation on this host.
    #[error("{0} is not supported on this host")]
    UnsupportedHost(&'static str),

    /// An external command failed; carries the raw error text.
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl From<PollError<CommandError>> for DeviceError {
    fn from(err: PollError<CommandError>) -> Self {
        match err {
            PollError::TimedOut { attempts } => DeviceError::BootTimeout { attempts },
            PollError::Cancelled => DeviceError::Cancelled,
            PollError::Probe(e) => DeviceError::Command(e),
        }
    }
}

/// Which kind of device `adb` should address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// The single running emulator (`adb -e`).
    #[default]
    Emulator,
    /// The single attached physical device (`adb -d`).
    Device,
}

impl DeviceClass {
    pub fn adb_selector(self) -> &'static str {
        match self {
            DeviceClass::Emulator => "-e",
            DeviceClass::Device => "-d",
        }
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emulator" => Ok(DeviceClass::Emulator),
            "device" | "real" => Ok(DeviceClass::Device),
            other => Err(format!("unknown device class '{other}' (expected emulator or device)")),
        }
    }
}

/// `adb <selector> shell getprop init.svc.bootanim`
pub fn boot_query(class: DeviceClass) -> CommandSpec {
    CommandSpec::new("adb")
        .arg(class.adb_selector())
        .args(["shell", "getprop", BOOT_PROPERTY])
}

/// Polls the boot-animation property until it reads "stopped".
///
/// Any command failure aborts the poll with the raw error.
#[instrument(skip(runner, policy, cancel))]
pub async fn check_booted(
    runner: &dyn CommandRunner,
    class: DeviceClass,
    policy: &PollPolicy,
    cancel: &CancellationToken,
) -> Result<(), DeviceError> {
    let spec = boot_query(class);
    info!(budget = ?policy.total_budget(), "waiting for device boot");

    poll_until(policy, cancel, |attempt| {
        let spec = &spec;
        async move {
            let output = runner.output(spec).await?.into_result(spec)?;
            debug!(attempt, value = %output.stdout.trim(), "boot animation state");
            Ok::<_, CommandError>(if output.stdout.contains("stopped") {
                Poll::Ready(())
            } else {
                Poll::Pending
            })
        }
    })
    .await?;

    info!("device booted");
    Ok(())
}

async fn kill_by_name(
    runner: &dyn CommandRunner,
    table: &dyn ProcessTable,
    host: HostOs,
    name: &str,
) -> Result<u32, DeviceError> {
    let process =
        find_by_cmdline(table, name).ok_or_else(|| DeviceError::PidNotFound(name.to_string()))?;
    kill_pid(runner, host, process.pid).await?;
    Ok(process.pid)
}

/// An Android Virtual Device run by the SDK emulator.
#[derive(Debug, Clone)]
pub struct AndroidEmulator {
    pub avd: String,
    pub android_home: PathBuf,
}

impl AndroidEmulator {
    pub fn new(avd: impl Into<String>, android_home: impl Into<PathBuf>) -> Self {
        Self {
            avd: avd.into(),
            android_home: android_home.into(),
        }
    }

    /// Uses `ANDROID_HOME`, falling back to `ANDROID_SDK_ROOT`.
    pub fn from_env(avd: impl Into<String>) -> Result<Self, DeviceError> {
        let home = std::env::var_os("ANDROID_HOME")
            .or_else(|| std::env::var_os("ANDROID_SDK_ROOT"))
            .filter(|v| !v.is_empty())
            .ok_or(DeviceError::AndroidHomeUnset)?;
        Ok(Self::new(avd, home))
    }

    /// `<android_home>/emulator/emulator`
    pub fn emulator_binary(&self, host: HostOs) -> PathBuf {
        self.android_home
            .join("emulator")
            .join(format!("emulator{}", host.exe_suffix()))
    }

    pub fn launch_command(&self, host: HostOs) -> CommandSpec {
        CommandSpec::new(path_string(&self.emulator_binary(host)))
            .args(["-avd", self.avd.as_str(), "-wipe-data"])
    }

    /// Starts the AVD with wiped data unless it is already running, then
    /// waits for it to boot.
    #[instrument(skip_all, fields(avd = %self.avd))]
    pub async fn launch(
        &self,
        runner: &dyn CommandRunner,
        table: &dyn ProcessTable,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceError> {
        match find_by_cmdline(table, &self.avd) {
            Some(process) => info!(pid = process.pid, "emulator already running"),
            None => {
                let pid = runner.spawn_detached(&self.launch_command(HostOs::current()))?;
                info!(pid, "emulator launched");
            }
        }
        check_booted(runner, DeviceClass::Emulator, policy, cancel).await
    }

    /// Kills the emulator process for this AVD.
    pub async fn kill(
        &self,
        runner: &dyn CommandRunner,
        table: &dyn ProcessTable,
        host: HostOs,
    ) -> Result<u32, DeviceError> {
        let pid = kill_by_name(runner, table, host, &self.avd).await?;
        info!(avd = %self.avd, pid, "emulator killed");
        Ok(pid)
    }
}

/// A Genymotion VM started through the Genymotion player.
#[derive(Debug, Clone)]
pub struct Genymotion {
    pub vm_name: String,
}

impl Genymotion {
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
        }
    }

    /// Location of the player binary. There is no known path on Windows.
    pub fn player_binary(host: HostOs) -> Result<PathBuf, DeviceError> {
        match host {
            HostOs::MacOs => Ok(PathBuf::from(
                "/Applications/Genymotion.app/Contents/MacOS/player.app/Contents/MacOS/player",
            )),
            HostOs::Linux => Ok(PathBuf::from("/opt/genymobile/genymotion/player")),
            HostOs::Windows | HostOs::Other => Err(DeviceError::UnsupportedHost("Genymotion")),
        }
    }

    pub fn launch_command(&self, host: HostOs) -> Result<CommandSpec, DeviceError> {
        let player = Self::player_binary(host)?;
        Ok(CommandSpec::new(path_string(&player)).args(["--vm-name", self.vm_name.as_str()]))
    }

    /// Starts the VM unless it is already running, then waits for it to boot.
    #[instrument(skip_all, fields(vm = %self.vm_name))]
    pub async fn launch(
        &self,
        runner: &dyn CommandRunner,
        table: &dyn ProcessTable,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceError> {
        self.launch_on(HostOs::current(), runner, table, policy, cancel).await
    }

    pub async fn launch_on(
        &self,
        host: HostOs,
        runner: &dyn CommandRunner,
        table: &dyn ProcessTable,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceError> {
        match find_by_cmdline(table, &self.vm_name) {
            Some(process) => info!(pid = process.pid, "Genymotion VM already running"),
            None => {
                let pid = runner.spawn_detached(&self.launch_command(host)?)?;
                info!(pid, "Genymotion VM launched");
            }
        }
        check_booted(runner, DeviceClass::Device, policy, cancel).await
    }

    /// Kills the player process for this VM.
    pub async fn kill(
        &self,
        runner: &dyn CommandRunner,
        table: &dyn ProcessTable,
        host: HostOs,
    ) -> Result<u32, DeviceError> {
        let pid = kill_by_name(runner, table, host, &self.vm_name).await?;
        info!(vm = %self.vm_name, pid, "Genymotion VM killed");
        Ok(pid)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
