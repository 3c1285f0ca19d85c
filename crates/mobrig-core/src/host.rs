//! Host operating system and mobile platform identification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::command::CommandSpec;

/// The operating system this process is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl HostOs {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => HostOs::Windows,
            "macos" => HostOs::MacOs,
            "linux" => HostOs::Linux,
            _ => HostOs::Other,
        }
    }

    /// Command that forcibly terminates `pid` on this host.
    ///
    /// `taskkill /F /PID <pid>` on Windows, `kill -9 <pid>` everywhere else.
    pub fn kill_command(self, pid: u32) -> CommandSpec {
        match self {
            HostOs::Windows => CommandSpec::new("taskkill").args(["/F", "/PID"]).arg(pid.to_string()),
            _ => CommandSpec::new("kill").arg("-9").arg(pid.to_string()),
        }
    }

    /// Name of the Appium launcher on this host.
    pub fn appium_binary(self) -> &'static str {
        match self {
            HostOs::Windows => "appium.cmd",
            _ => "appium",
        }
    }

    /// Suffix for native executables (`.exe` on Windows).
    pub fn exe_suffix(self) -> &'static str {
        match self {
            HostOs::Windows => ".exe",
            _ => "",
        }
    }
}

/// The mobile platform under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    /// Value for the `platformName` capability.
    pub fn capability_name(self) -> &'static str {
        match self {
            Platform::Ios => "iOS",
            Platform::Android => "Android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.capability_name())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(format!("unknown platform '{other}' (expected ios or android)")),
        }
    }
}
