//! # mobrig-core
//!
//! Core library for preparing mobile test runs: starting and stopping a local
//! Appium server, opening and tearing down WebDriver sessions, launching and
//! killing Android emulators and Genymotion VMs, shutting down iOS simulators
//! and looking up iOS signing material.
//!
//! ## Modules
//!
//! - [`appium`] - Appium server launch, discovery and shutdown
//! - [`capabilities`] - Platform-specific session capabilities
//! - [`webdriver`] - WebDriver session open/teardown and the [`webdriver::DriverContext`] slot
//! - [`device`] - Android emulator and Genymotion launch, boot polling and kill
//! - [`simctl`] - Wrapper around `xcrun simctl` for simulator shutdown
//! - [`signing`] - Keychain certificate and provisioning profile lookup
//! - [`retry`] - Cancellable fixed-interval polling
//! - [`command`] - External command execution behind [`command::CommandRunner`]
//! - [`process`] - Process table lookups and kills
//! - [`host`] - Host OS and target platform detection
//! - [`config`] - Persistent settings in `~/.mobrig/config.json`
//!
//! ## External Dependencies
//!
//! Depending on what you drive, these tools must be installed:
//!
//! - **Appium** (`npm install -g appium`)
//! - **Android SDK** (`adb` on `PATH`, `ANDROID_HOME` pointing at the SDK)
//! - **Genymotion** desktop player
//! - **Xcode** (for `xcrun simctl` and `security`)
//!
//! ## Example
//!
//! ```no_run
//! use mobrig_core::appium::{AppiumConfig, AppiumServer};
//! use mobrig_core::capabilities::Capabilities;
//! use mobrig_core::host::Platform;
//! use mobrig_core::webdriver::DriverContext;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = AppiumServer::start(&AppiumConfig::default()).await?;
//!
//! let mut base = Capabilities::new();
//! base.set("appPackage", "com.example.app");
//! let mut ctx = DriverContext::default();
//! ctx.open(server.endpoint(), Platform::Android, base).await?;
//!
//! ctx.teardown().await?;
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod appium;
pub mod capabilities;
pub mod command;
pub mod config;
pub mod device;
pub mod host;
pub mod process;
pub mod retry;
pub mod signing;
pub mod simctl;
pub mod webdriver;
