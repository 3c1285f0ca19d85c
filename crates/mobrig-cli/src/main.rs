//! Command-line front-end for mobile test-run orchestration.
//!
//! Starts and stops a local Appium server, launches and kills Android
//! emulators and Genymotion VMs, shuts down iOS simulators, checks that a
//! WebDriver session can be opened, and looks up iOS signing material.
//!
//! # Usage
//!
//! ```bash
//! # Run Appium until Ctrl-C
//! mobrig appium start --port 4723
//!
//! # Stop an Appium server started elsewhere
//! mobrig appium stop
//!
//! # Launch an AVD with wiped data and wait for it to boot
//! mobrig android launch --avd Pixel_7_API_34
//!
//! # Kill it again
//! mobrig android kill --avd Pixel_7_API_34
//!
//! # Open and tear down a session against the running server
//! mobrig session check --platform android --caps caps.json
//!
//! # Shut down the booted simulator
//! mobrig simulator shutdown
//!
//! # Find a signing identity (JSON output)
//! mobrig --format json signing cert --type developer "Jane Appleseed"
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use mobrig_core::appium::{
    discover_running, stop_running, AppiumError, AppiumServer, ServerEndpoint,
};
use mobrig_core::capabilities::Capabilities;
use mobrig_core::command::SystemRunner;
use mobrig_core::config::{config_path, RigConfig};
use mobrig_core::device::{check_booted, AndroidEmulator, DeviceClass, DeviceError, Genymotion};
use mobrig_core::host::{HostOs, Platform};
use mobrig_core::process::SystemProcessTable;
use mobrig_core::signing::{
    CertificateType, KeychainStore, ProfileType, SigningError, SigningLookup,
};
use mobrig_core::simctl::{shutdown_booted_simulator, Simctl, SimctlError};
use mobrig_core::webdriver::{DriverContext, WebDriverError};

/// Appium, emulator and simulator orchestration for mobile test runs.
#[derive(Parser)]
#[command(name = "mobrig")]
#[command(about = "Prepare and clean up devices and Appium for mobile test runs")]
#[command(version)]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true, env = "MOBRIG_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Control the local Appium server
    #[command(subcommand)]
    Appium(AppiumCommand),

    /// Control Android emulators
    #[command(subcommand)]
    Android(AndroidCommand),

    /// Control Genymotion VMs
    #[command(subcommand)]
    Genymotion(GenymotionCommand),

    /// Control iOS simulators
    #[command(subcommand)]
    Simulator(SimulatorCommand),

    /// WebDriver session checks
    #[command(subcommand)]
    Session(SessionCommand),

    /// Look up iOS code-signing material
    #[command(subcommand)]
    Signing(SigningCommand),

    /// Show the persistent configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum AppiumCommand {
    /// Start the server and keep it running until Ctrl-C
    Start {
        /// Bind address (localhost, 0.0.0.0 or 127.0.0.1)
        #[arg(long, env = "MOBRIG_APPIUM_HOST")]
        host: Option<String>,
        /// Port to listen on
        #[arg(short, long, env = "MOBRIG_APPIUM_PORT")]
        port: Option<u16>,
        /// Appium launcher to execute
        #[arg(long, env = "MOBRIG_APPIUM_BINARY")]
        binary: Option<String>,
        /// Seconds to wait for the server to report its listener
        #[arg(long)]
        startup_timeout: Option<u64>,
    },

    /// Stop a running server found in the process table
    Stop {
        /// Launcher name to search for
        #[arg(long, env = "MOBRIG_APPIUM_BINARY")]
        binary: Option<String>,
    },

    /// Show the running server's PID and endpoint
    Status {
        /// Launcher name to search for
        #[arg(long, env = "MOBRIG_APPIUM_BINARY")]
        binary: Option<String>,
    },
}

#[derive(Subcommand)]
enum AndroidCommand {
    /// Launch an AVD with wiped data and wait for it to boot
    Launch {
        /// AVD name
        #[arg(long, env = "MOBRIG_AVD")]
        avd: Option<String>,
        /// Android SDK root (defaults to ANDROID_HOME)
        #[arg(long)]
        android_home: Option<PathBuf>,
    },

    /// Kill the emulator running an AVD
    Kill {
        /// AVD name
        #[arg(long, env = "MOBRIG_AVD")]
        avd: Option<String>,
    },

    /// Wait until the attached device has finished booting
    WaitBoot {
        /// Which device adb should address: emulator or device
        #[arg(long, default_value = "emulator")]
        device_class: DeviceClass,
    },
}

#[derive(Subcommand)]
enum GenymotionCommand {
    /// Start a VM and wait for it to boot
    Launch {
        /// VM name as shown in Genymotion
        #[arg(long, env = "MOBRIG_GENYMOTION_VM")]
        vm: Option<String>,
    },

    /// Kill the player running a VM
    Kill {
        /// VM name as shown in Genymotion
        #[arg(long, env = "MOBRIG_GENYMOTION_VM")]
        vm: Option<String>,
    },
}

#[derive(Subcommand)]
enum SimulatorCommand {
    /// List available simulators
    List,

    /// Boot a simulator by UDID
    Boot {
        /// Simulator UDID
        udid: String,
    },

    /// Shut down the booted simulator and kill leftover processes
    Shutdown {
        /// Seconds to wait before killing leftovers
        #[arg(long, default_value = "5")]
        grace: u64,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Open a session, print it, and tear it down
    Check {
        /// Target platform: ios or android
        #[arg(long)]
        platform: Platform,
        /// JSON file with base capabilities
        #[arg(long)]
        caps: Option<PathBuf>,
        /// Server as host:port (discovered from the process table if omitted)
        #[arg(long)]
        endpoint: Option<String>,
        /// Launcher name to search for when discovering the server
        #[arg(long, env = "MOBRIG_APPIUM_BINARY")]
        binary: Option<String>,
    },
}

#[derive(Subcommand)]
enum SigningCommand {
    /// Find a signing certificate whose name contains TERM
    Cert {
        /// Certificate type: developer or distribution
        #[arg(short = 't', long = "type")]
        kind: String,
        /// Substring of the certificate name
        term: String,
    },

    /// Find a provisioning profile named exactly NAME
    Profile {
        /// Profile type: adhoc, development or distribution
        #[arg(short = 't', long = "type")]
        kind: String,
        /// Profile name
        name: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write the effective configuration to the config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_logging(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let default = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match &cli.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file = path
                .file_name()
                .unwrap_or(std::ffi::OsStr::new("mobrig.log"));
            let file_appender = tracing_appender::rolling::never(dir, file);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

#[derive(Debug)]
enum CliError {
    /// Bad input or an unsupported setup; nothing was attempted.
    Usage(String),
    /// The operation ran and failed.
    Failed(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Failed(_) => ExitCode::from(1),
            CliError::Usage(_) => ExitCode::from(2),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<AppiumError> for CliError {
    fn from(e: AppiumError) -> Self {
        match e {
            AppiumError::ExternalServerUnsupported(_) => CliError::Usage(e.to_string()),
            other => CliError::Failed(other.to_string()),
        }
    }
}

impl From<DeviceError> for CliError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::AndroidHomeUnset | DeviceError::UnsupportedHost(_) => {
                CliError::Usage(e.to_string())
            }
            other => CliError::Failed(other.to_string()),
        }
    }
}

impl From<SigningError> for CliError {
    fn from(e: SigningError) -> Self {
        match e {
            SigningError::InvalidType { .. } => CliError::Usage(e.to_string()),
            other => CliError::Failed(other.to_string()),
        }
    }
}

impl From<SimctlError> for CliError {
    fn from(e: SimctlError) -> Self {
        CliError::Failed(e.to_string())
    }
}

impl From<WebDriverError> for CliError {
    fn from(e: WebDriverError) -> Self {
        match e {
            WebDriverError::Appium(inner) => inner.into(),
            other => CliError::Failed(other.to_string()),
        }
    }
}

/// Prints `value` in JSON mode, `text` otherwise.
fn emit(format: OutputFormat, value: serde_json::Value, text: impl std::fmt::Display) {
    if format == OutputFormat::Json {
        println!("{}", value);
    } else {
        println!("{}", text);
    }
}

/// Token cancelled on Ctrl-C, for long polls.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = RigConfig::load();
    let format = cli.format;

    match cli.command {
        Command::Appium(cmd) => run_appium(cmd, &config, format).await,
        Command::Android(cmd) => run_android(cmd, &config, format).await,
        Command::Genymotion(cmd) => run_genymotion(cmd, &config, format).await,
        Command::Simulator(cmd) => run_simulator(cmd, format).await,
        Command::Session(cmd) => run_session(cmd, &config, format).await,
        Command::Signing(cmd) => run_signing(cmd, format).await,
        Command::Config(cmd) => run_config(cmd, &config, format),
    }
}

async fn run_appium(
    cmd: AppiumCommand,
    config: &RigConfig,
    format: OutputFormat,
) -> Result<(), CliError> {
    let mut appium = config.appium_config();

    match cmd {
        AppiumCommand::Start {
            host,
            port,
            binary,
            startup_timeout,
        } => {
            if let Some(host) = host {
                appium.host = host;
            }
            if let Some(port) = port {
                appium.port = port;
            }
            if let Some(binary) = binary {
                appium.binary = binary;
            }
            if let Some(secs) = startup_timeout {
                appium.startup_timeout = Duration::from_secs(secs);
            }

            let server = AppiumServer::start(&appium).await?;
            let endpoint = server.endpoint().clone();
            emit(
                format,
                json!({ "host": endpoint.host, "port": endpoint.port, "pid": server.pid() }),
                format!("Appium listening on {} (Ctrl-C to stop)", endpoint),
            );

            tokio::signal::ctrl_c()
                .await
                .map_err(|e| CliError::Failed(format!("Failed to wait for Ctrl-C: {}", e)))?;
            info!("Ctrl-C received, stopping Appium");
            server.shutdown().await?;
            Ok(())
        }
        AppiumCommand::Stop { binary } => {
            let binary = binary.unwrap_or(appium.binary);
            let pid = stop_running(&SystemProcessTable, &SystemRunner, HostOs::current(), &binary)
                .await?;
            emit(
                format,
                json!({ "success": true, "pid": pid }),
                format!("Stopped Appium server (PID {})", pid),
            );
            Ok(())
        }
        AppiumCommand::Status { binary } => {
            let binary = binary.unwrap_or(appium.binary);
            let (process, endpoint) = discover_running(&SystemProcessTable, &binary)?;
            emit(
                format,
                json!({ "pid": process.pid, "host": endpoint.host, "port": endpoint.port }),
                format!("Appium running (PID {}) on {}", process.pid, endpoint),
            );
            Ok(())
        }
    }
}

/// Takes the command-line value, falling back to the config file.
fn require(value: Option<String>, fallback: Option<&String>, what: &str) -> Result<String, CliError> {
    value.or_else(|| fallback.cloned()).ok_or_else(|| {
        CliError::Usage(format!(
            "No {} given (pass it as an option or set it in {})",
            what,
            config_path().display()
        ))
    })
}

async fn run_android(
    cmd: AndroidCommand,
    config: &RigConfig,
    format: OutputFormat,
) -> Result<(), CliError> {
    match cmd {
        AndroidCommand::Launch { avd, android_home } => {
            let avd = require(avd, config.android.avd.as_ref(), "AVD name")?;
            let emulator = match android_home.or_else(|| config.android.android_home.clone()) {
                Some(home) => AndroidEmulator::new(avd, home),
                None => AndroidEmulator::from_env(avd)?,
            };
            emulator
                .launch(&SystemRunner, &SystemProcessTable, &config.poll_policy(), &ctrl_c_token())
                .await?;
            emit(
                format,
                json!({ "success": true, "avd": emulator.avd }),
                format!("Emulator {} booted", emulator.avd),
            );
            Ok(())
        }
        AndroidCommand::Kill { avd } => {
            let avd = require(avd, config.android.avd.as_ref(), "AVD name")?;
            let emulator = AndroidEmulator::new(avd, config.android.android_home.clone().unwrap_or_default());
            let pid = emulator
                .kill(&SystemRunner, &SystemProcessTable, HostOs::current())
                .await?;
            emit(
                format,
                json!({ "success": true, "avd": emulator.avd, "pid": pid }),
                format!("Killed emulator {} (PID {})", emulator.avd, pid),
            );
            Ok(())
        }
        AndroidCommand::WaitBoot { device_class } => {
            check_booted(&SystemRunner, device_class, &config.poll_policy(), &ctrl_c_token()).await?;
            emit(format, json!({ "success": true, "booted": true }), "Device booted");
            Ok(())
        }
    }
}

async fn run_genymotion(
    cmd: GenymotionCommand,
    config: &RigConfig,
    format: OutputFormat,
) -> Result<(), CliError> {
    match cmd {
        GenymotionCommand::Launch { vm } => {
            let vm = Genymotion::new(require(vm, config.genymotion.vm_name.as_ref(), "Genymotion VM name")?);
            vm.launch(&SystemRunner, &SystemProcessTable, &config.poll_policy(), &ctrl_c_token())
                .await?;
            emit(
                format,
                json!({ "success": true, "vm": vm.vm_name }),
                format!("Genymotion VM {} booted", vm.vm_name),
            );
            Ok(())
        }
        GenymotionCommand::Kill { vm } => {
            let vm = Genymotion::new(require(vm, config.genymotion.vm_name.as_ref(), "Genymotion VM name")?);
            let pid = vm
                .kill(&SystemRunner, &SystemProcessTable, HostOs::current())
                .await?;
            emit(
                format,
                json!({ "success": true, "vm": vm.vm_name, "pid": pid }),
                format!("Killed Genymotion VM {} (PID {})", vm.vm_name, pid),
            );
            Ok(())
        }
    }
}

async fn run_simulator(cmd: SimulatorCommand, format: OutputFormat) -> Result<(), CliError> {
    match cmd {
        SimulatorCommand::List => {
            let devices = Simctl::new(&SystemRunner).list_devices().await?;
            if format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&devices)
                        .map_err(|e| CliError::Failed(e.to_string()))?
                );
            } else if devices.is_empty() {
                eprintln!("No simulator devices found");
            } else {
                for device in &devices {
                    let state = if device.is_booted() { " (Booted)" } else { "" };
                    println!("{} -- {}{}", device.udid, device.name, state);
                }
            }
            Ok(())
        }
        SimulatorCommand::Boot { udid } => {
            Simctl::new(&SystemRunner).boot(&udid).await?;
            emit(
                format,
                json!({ "success": true, "udid": udid }),
                format!("Booted {}", udid),
            );
            Ok(())
        }
        SimulatorCommand::Shutdown { grace } => {
            shutdown_booted_simulator(&SystemRunner, Duration::from_secs(grace)).await?;
            emit(format, json!({ "success": true }), "Simulator shut down");
            Ok(())
        }
    }
}

fn parse_endpoint_arg(value: &str) -> Result<ServerEndpoint, CliError> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| CliError::Usage(format!("Invalid endpoint '{}' (expected host:port)", value)))?;
    let port = port
        .parse()
        .map_err(|_| CliError::Usage(format!("Invalid port in endpoint '{}'", value)))?;
    Ok(ServerEndpoint::new(host, port))
}

async fn run_session(
    cmd: SessionCommand,
    config: &RigConfig,
    format: OutputFormat,
) -> Result<(), CliError> {
    let SessionCommand::Check {
        platform,
        caps,
        endpoint,
        binary,
    } = cmd;

    let base = match caps {
        Some(path) => Capabilities::from_json_file(&path).map_err(|e| {
            CliError::Usage(format!("Failed to read capabilities from {}: {}", path.display(), e))
        })?,
        None => Capabilities::new(),
    };

    let mut ctx = DriverContext::new(config.session_config());
    let session = match endpoint {
        Some(value) => ctx.open(&parse_endpoint_arg(&value)?, platform, base).await?,
        None => {
            let binary = binary.unwrap_or_else(|| config.appium_config().binary);
            ctx.open_discovered(&SystemProcessTable, &binary, platform, base)
                .await?
        }
    };

    emit(
        format,
        json!({
            "session_id": session.session_id(),
            "platform": session.platform(),
            "capabilities": session.capabilities(),
        }),
        format!("Opened {} session {}", session.platform(), session.session_id()),
    );

    ctx.teardown().await?;
    if format == OutputFormat::Text {
        println!("Session closed");
    }
    Ok(())
}

async fn run_signing(cmd: SigningCommand, format: OutputFormat) -> Result<(), CliError> {
    let lookup = SigningLookup::new(KeychainStore::new(SystemRunner));

    match cmd {
        SigningCommand::Cert { kind, term } => {
            kind.parse::<CertificateType>()?;
            match lookup.find_certificate(&kind, &term).await? {
                Some(cert) => emit(
                    format,
                    json!({ "certificate": cert }),
                    format!("{} {}", cert.fingerprint, cert.name),
                ),
                None if format == OutputFormat::Json => println!("{}", json!({ "certificate": null })),
                None => eprintln!("Certificate lookup is only available on macOS"),
            }
            Ok(())
        }
        SigningCommand::Profile { kind, name } => {
            kind.parse::<ProfileType>()?;
            match lookup.find_profile(&kind, &name).await? {
                Some(profile) => emit(
                    format,
                    json!({ "profile": profile }),
                    format!("{} {} ({})", profile.uuid, profile.name, profile.path.display()),
                ),
                None if format == OutputFormat::Json => println!("{}", json!({ "profile": null })),
                None => eprintln!("Provisioning profile lookup is only available on macOS"),
            }
            Ok(())
        }
    }
}

fn run_config(cmd: ConfigCommand, config: &RigConfig, format: OutputFormat) -> Result<(), CliError> {
    match cmd {
        ConfigCommand::Show => {
            let text = serde_json::to_string_pretty(config)
                .map_err(|e| CliError::Failed(e.to_string()))?;
            println!("{}", text);
            Ok(())
        }
        ConfigCommand::Path => {
            let path = config_path();
            emit(
                format,
                json!({ "path": path }),
                path.display(),
            );
            Ok(())
        }
        ConfigCommand::Init { force } => {
            let path = config_path();
            if path.exists() && !force {
                return Err(CliError::Failed(format!(
                    "Config file already exists at {} (use --force to overwrite)",
                    path.display()
                )));
            }
            config
                .save()
                .map_err(|e| CliError::Failed(format!("Failed to write {}: {}", path.display(), e)))?;
            emit(
                format,
                json!({ "success": true, "path": path }),
                format!("Wrote {}", path.display()),
            );
            Ok(())
        }
    }
}
