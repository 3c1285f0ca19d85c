//! WebDriver session capabilities.
//!
//! Caller-supplied capabilities pass through untouched apart from a small set
//! of platform-specific keys injected by [`Capabilities::for_platform`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::host::Platform;

/// Seconds of inactivity before Appium ends a session on its own.
pub const NEW_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Seconds Appium waits for an Android device to become ready.
pub const DEVICE_READY_TIMEOUT_SECS: u64 = 60;

pub const IOS_AUTOMATION: &str = "XCUITest";
pub const ANDROID_AUTOMATION: &str = "UiAutomator2";

/// A JSON object of desired session options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(Map<String, Value>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes `base` and injects the keys required for `platform`.
    ///
    /// Always sets `platformName` and `newCommandTimeout`. iOS sets the
    /// automation engine; Android sets the engine and `deviceReadyTimeout`.
    pub fn for_platform(platform: Platform, base: Capabilities) -> Self {
        let mut caps = base;
        caps.set("platformName", platform.capability_name());
        caps.set("newCommandTimeout", NEW_COMMAND_TIMEOUT_SECS);
        match platform {
            Platform::Ios => {
                caps.set("automationName", IOS_AUTOMATION);
            }
            Platform::Android => {
                caps.set("automationName", ANDROID_AUTOMATION);
                caps.set("deviceReadyTimeout", DEVICE_READY_TIMEOUT_SECS);
            }
        }
        caps
    }

    /// Reads a capability object from a JSON file.
    pub fn from_json_file(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(std::io::Error::other)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// The bundle ID (iOS) or package name (Android) of the app under test.
    pub fn app_identifier(&self, platform: Platform) -> Option<&str> {
        self.get_str(app_identifier_key(platform))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Capabilities {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Capability key naming the app under test on `platform`.
pub fn app_identifier_key(platform: Platform) -> &'static str {
    match platform {
        Platform::Ios => "bundleId",
        Platform::Android => "appPackage",
    }
}
