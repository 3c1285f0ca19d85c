//! Persistent configuration for mobrig.
//!
//! Stores user settings in `~/.mobrig/config.json`. Every section is optional;
//! missing keys fall back to the same defaults the library uses.
//!
//! # Example
//!
//! ```no_run
//! use mobrig_core::config::RigConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = RigConfig::load();
//!
//! let appium = config.appium_config();
//! println!("Appium on {}:{}", appium.host, appium.port);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::appium::{AppiumConfig, DEFAULT_HOST, DEFAULT_PORT};
use crate::retry::PollPolicy;
use crate::webdriver::SessionConfig;

const CONFIG_FILENAME: &str = "config.json";

/// Returns the mobrig data directory (`~/.mobrig`), creating it if needed.
///
/// Falls back to the system temp directory when there is no home directory.
pub fn mobrig_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".mobrig");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Path of the config file inside [`mobrig_dir`].
pub fn config_path() -> PathBuf {
    mobrig_dir().join(CONFIG_FILENAME)
}

/// Persistent mobrig configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct RigConfig {
    pub appium: AppiumSettings,
    pub android: AndroidSettings,
    pub genymotion: GenymotionSettings,
    pub session: SessionSettings,
    pub boot: BootSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppiumSettings {
    pub host: String,
    pub port: u16,
    /// Launcher override; the platform default (`appium` / `appium.cmd`) when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    pub startup_timeout_secs: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl Default for AppiumSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            binary: None,
            startup_timeout_secs: 60,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AndroidSettings {
    /// SDK root. `ANDROID_HOME` is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android_home: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avd: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GenymotionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub base_path: String,
    pub request_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            base_path: defaults.base_path,
            request_timeout_secs: defaults.request_timeout.as_secs(),
        }
    }
}

/// Boot polling schedule, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootSettings {
    pub initial_delay_secs: u64,
    pub interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for BootSettings {
    fn default() -> Self {
        let policy = PollPolicy::boot();
        Self {
            initial_delay_secs: policy.initial_delay.as_secs(),
            interval_secs: policy.interval.as_secs(),
            max_attempts: policy.max_attempts,
        }
    }
}

impl RigConfig {
    /// Load config from `~/.mobrig/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.mobrig/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn appium_config(&self) -> AppiumConfig {
        let defaults = AppiumConfig::default();
        AppiumConfig {
            host: self.appium.host.clone(),
            port: self.appium.port,
            binary: self.appium.binary.clone().unwrap_or(defaults.binary),
            startup_timeout: Duration::from_secs(self.appium.startup_timeout_secs),
            extra_args: self.appium.extra_args.clone(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            base_path: self.session.base_path.clone(),
            request_timeout: Duration::from_secs(self.session.request_timeout_secs),
        }
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::from_secs(self.boot.initial_delay_secs),
            interval: Duration::from_secs(self.boot.interval_secs),
            max_attempts: self.boot.max_attempts,
        }
    }
}
