//! WebDriver session control against a local Appium server.
//!
//! [`WebDriverSession`] speaks just enough of the WebDriver/Appium HTTP API to
//! open a session, uninstall the app under test and quit. [`DriverContext`] is
//! the caller-owned slot holding at most one active session.
//!
//! # Example
//!
//! ```no_run
//! use mobrig_core::appium::ServerEndpoint;
//! use mobrig_core::capabilities::Capabilities;
//! use mobrig_core::host::Platform;
//! use mobrig_core::webdriver::DriverContext;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut ctx = DriverContext::default();
//! let mut base = Capabilities::new();
//! base.set("appPackage", "com.example.app");
//!
//! ctx.open(&ServerEndpoint::new("127.0.0.1", 4723), Platform::Android, base).await?;
//! println!("session {}", ctx.session().unwrap().session_id());
//! ctx.teardown().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::appium::{discover_running, AppiumError, ServerEndpoint};
use crate::capabilities::{app_identifier_key, Capabilities};
use crate::host::Platform;
use crate::process::ProcessTable;

/// Errors from WebDriver session operations.
#[derive(Error, Debug)]
pub enum WebDriverError {
    /// The HTTP request itself failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("WebDriver request failed ({status}): {message}")]
    Status { status: StatusCode, message: String },

    /// The new-session response had no session id.
    #[error("no session id in WebDriver response")]
    MissingSessionId,

    /// A session is already open in this context.
    #[error("a WebDriver session is already active: {0}")]
    SessionActive(String),

    /// The server endpoint could not be determined.
    #[error(transparent)]
    Appium(#[from] AppiumError),
}

/// HTTP settings for WebDriver sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Path prefix of the WebDriver API (`/wd/hub` for Appium 1.x, `/` for 2.x).
    pub base_path: String,
    /// Per-request timeout. Session creation can take minutes on a cold device.
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_path: "/wd/hub".to_string(),
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// An open WebDriver session.
#[derive(Debug)]
pub struct WebDriverSession {
    http: Client,
    base_url: String,
    id: String,
    platform: Platform,
    capabilities: Capabilities,
}

impl WebDriverSession {
    /// Creates a session on the server at `endpoint`.
    #[instrument(skip_all, fields(%endpoint, %platform))]
    pub async fn open(
        endpoint: &ServerEndpoint,
        config: &SessionConfig,
        platform: Platform,
        capabilities: Capabilities,
    ) -> Result<Self, WebDriverError> {
        // The server is always local; never route through a proxy.
        let http = Client::builder()
            .timeout(config.request_timeout)
            .no_proxy()
            .build()?;
        let base_url = endpoint.base_url(&config.base_path);

        let caps = capabilities.into_value();
        let payload = json!({
            "capabilities": {
                "alwaysMatch": caps,
                "firstMatch": [{}],
            },
            "desiredCapabilities": caps,
        });

        info!(%base_url, "opening WebDriver session");
        let body = send(&http, Method::POST, &format!("{base_url}/session"), Some(&payload)).await?;
        let (id, reported) = parse_new_session(&body)?;
        info!(session_id = %id, "WebDriver session opened");

        Ok(Self {
            http,
            base_url,
            id,
            platform,
            capabilities: reported,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.id
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Capabilities as reported back by the server.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.id, path)
    }

    /// Closes the app under test.
    pub async fn close_app(&self) -> Result<(), WebDriverError> {
        debug!(session_id = %self.id, "closing app");
        send(&self.http, Method::POST, &self.url("/appium/app/close"), Some(&json!({}))).await?;
        Ok(())
    }

    /// Uninstalls `app_id` from the device.
    pub async fn remove_app(&self, app_id: &str) -> Result<(), WebDriverError> {
        debug!(session_id = %self.id, app_id, "removing app");
        let payload = json!({ "appId": app_id, "bundleId": app_id });
        send(&self.http, Method::POST, &self.url("/appium/device/remove_app"), Some(&payload)).await?;
        Ok(())
    }

    /// Ends the session on the server.
    pub async fn quit(&self) -> Result<(), WebDriverError> {
        debug!(session_id = %self.id, "quitting session");
        send(&self.http, Method::DELETE, &self.url(""), None).await?;
        Ok(())
    }

    /// Closes and uninstalls the app under test, then quits.
    ///
    /// The app is identified by `bundleId` (iOS) or `appPackage` (Android) in
    /// the server-reported capabilities; uninstall is skipped when absent.
    pub async fn teardown(&self) -> Result<(), WebDriverError> {
        self.close_app().await?;
        match self.capabilities.app_identifier(self.platform) {
            Some(app_id) => self.remove_app(app_id).await?,
            None => warn!(
                key = app_identifier_key(self.platform),
                "no app identifier reported, skipping uninstall"
            ),
        }
        self.quit().await?;
        info!(session_id = %self.id, "WebDriver session closed");
        Ok(())
    }
}

async fn send(
    http: &Client,
    method: Method,
    url: &str,
    body: Option<&Value>,
) -> Result<Value, WebDriverError> {
    debug!(%method, url, "webdriver request");
    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request.json(body);
    }
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    let value: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

    if !status.is_success() {
        let message = value["value"]["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or(text);
        return Err(WebDriverError::Status { status, message });
    }
    Ok(value)
}

/// Extracts the session id and reported capabilities from a new-session
/// response in either W3C or legacy JSON Wire form.
fn parse_new_session(body: &Value) -> Result<(String, Capabilities), WebDriverError> {
    let value = &body["value"];
    if let Some(id) = value["sessionId"].as_str() {
        let caps = value["capabilities"].as_object().cloned().unwrap_or_default();
        return Ok((id.to_string(), caps.into()));
    }
    if let Some(id) = body["sessionId"].as_str() {
        let caps = value.as_object().cloned().unwrap_or_default();
        return Ok((id.to_string(), caps.into()));
    }
    Err(WebDriverError::MissingSessionId)
}

/// Caller-owned holder for at most one active WebDriver session.
#[derive(Debug, Default)]
pub struct DriverContext {
    config: SessionConfig,
    active: Option<WebDriverSession>,
}

impl DriverContext {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    /// Opens a session with capabilities built for `platform`.
    pub async fn open(
        &mut self,
        endpoint: &ServerEndpoint,
        platform: Platform,
        base: Capabilities,
    ) -> Result<&WebDriverSession, WebDriverError> {
        if let Some(active) = &self.active {
            return Err(WebDriverError::SessionActive(active.id.clone()));
        }
        let caps = Capabilities::for_platform(platform, base);
        let session = WebDriverSession::open(endpoint, &self.config, platform, caps).await?;
        Ok(self.active.insert(session))
    }

    /// Like [`open`](Self::open), with the endpoint recovered from the running
    /// Appium process's launch arguments.
    pub async fn open_discovered(
        &mut self,
        table: &dyn ProcessTable,
        binary: &str,
        platform: Platform,
        base: Capabilities,
    ) -> Result<&WebDriverSession, WebDriverError> {
        let (_, endpoint) = discover_running(table, binary)?;
        self.open(&endpoint, platform, base).await
    }

    pub fn session(&self) -> Option<&WebDriverSession> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Tears down the active session, if any.
    ///
    /// Does nothing when no session is open. On failure the session stays in
    /// the context so the caller can retry or inspect it.
    pub async fn teardown(&mut self) -> Result<(), WebDriverError> {
        let Some(session) = &self.active else {
            debug!("no active WebDriver session to tear down");
            return Ok(());
        };
        session.teardown().await?;
        self.active = None;
        Ok(())
    }
}
