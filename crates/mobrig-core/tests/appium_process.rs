//! Appium server discovery, stop and launch-handshake tests.

mod common;

use common::{process_table, ScriptedRunner};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use mobrig_core::appium::{
    discover_running, stop_running, wait_for_listener, AppiumError, ServerEndpoint,
};
use mobrig_core::command::CommandOutput;
use mobrig_core::host::HostOs;

const APPIUM_CMDLINE: &str =
    "node /usr/local/lib/node_modules/appium/build/lib/main.js --log-no-colors --address 127.0.0.1 --port 4800 --show-ios-log";

#[tokio::test]
async fn test_stop_kills_the_matching_process() {
    let runner = ScriptedRunner::always("");
    let table = process_table(&[(12, "/bin/zsh"), (4321, APPIUM_CMDLINE)]);

    let pid = stop_running(&table, &runner, HostOs::MacOs, "appium").await.unwrap();

    assert_eq!(pid, 4321);
    assert_eq!(runner.call_lines(), vec!["kill -9 4321"]);
}

#[tokio::test]
async fn test_stop_on_windows_uses_taskkill() {
    let runner = ScriptedRunner::always("SUCCESS");
    let table = process_table(&[(88, "C:\\nodejs\\node.exe C:\\npm\\appium.cmd --port 4723")]);

    stop_running(&table, &runner, HostOs::Windows, "appium.cmd").await.unwrap();
    assert_eq!(runner.call_lines(), vec!["taskkill /F /PID 88"]);
}

#[tokio::test]
async fn test_stop_without_server_is_pid_not_found() {
    let runner = ScriptedRunner::always("");
    let table = process_table(&[(12, "/bin/zsh")]);

    let err = stop_running(&table, &runner, HostOs::Linux, "appium").await.unwrap_err();

    assert!(matches!(err, AppiumError::PidNotFound(_)));
    assert!(err.to_string().contains("Appium server PID not found"));
    assert!(runner.calls().is_empty(), "nothing is killed");
}

#[tokio::test]
async fn test_stop_surfaces_kill_failure() {
    let runner = ScriptedRunner::new(
        vec![CommandOutput::failed(1, "kill: (4321): No such process\n")],
        CommandOutput::ok(""),
    );
    let table = process_table(&[(4321, APPIUM_CMDLINE)]);

    let err = stop_running(&table, &runner, HostOs::Linux, "appium").await.unwrap_err();
    assert!(matches!(err, AppiumError::Command(_)));
    assert!(err.to_string().contains("No such process"));
}

#[test]
fn test_discover_recovers_launch_endpoint() {
    let table = process_table(&[(4321, APPIUM_CMDLINE)]);
    let (process, endpoint) = discover_running(&table, "appium").unwrap();
    assert_eq!(process.pid, 4321);
    assert_eq!(endpoint, ServerEndpoint::new("127.0.0.1", 4800));
    assert_eq!(endpoint.base_url("/wd/hub"), "http://127.0.0.1:4800/wd/hub");
}

#[test]
fn test_discover_defaults_when_flags_absent() {
    let table = process_table(&[(1, "node /usr/local/bin/appium")]);
    let (_, endpoint) = discover_running(&table, "appium").unwrap();
    assert_eq!(endpoint, ServerEndpoint::new("0.0.0.0", 4723));
    assert_eq!(endpoint.base_url("/wd/hub/"), "http://127.0.0.1:4723/wd/hub");
}

#[test]
fn test_discover_without_server_fails() {
    let err = discover_running(&process_table(&[]), "appium").unwrap_err();
    assert!(matches!(err, AppiumError::PidNotFound(_)));
}

// ---------------------------------------------------------------------------
// Launch handshake over real pipes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_listener_line_arrives_after_banner() {
    let (out_rx, mut out_tx) = tokio::io::duplex(1024);
    let (err_rx, _err_tx) = tokio::io::duplex(1024);
    let mut stdout = BufReader::new(out_rx).lines();
    let mut stderr = BufReader::new(err_rx).lines();

    tokio::spawn(async move {
        out_tx
            .write_all(b"[Appium] Welcome to Appium v1.22.3\n[Appium] Non-default server args:\n")
            .await
            .unwrap();
        out_tx
            .write_all(b"[Appium] Appium REST http interface listener started on 0.0.0.0:4723\n")
            .await
            .unwrap();
    });

    let endpoint = wait_for_listener(&mut stdout, &mut stderr).await.unwrap();
    assert_eq!(endpoint, ServerEndpoint::new("0.0.0.0", 4723));
}

#[tokio::test]
async fn test_stderr_before_listener_rejects() {
    let (out_rx, _out_tx) = tokio::io::duplex(1024);
    let (err_rx, mut err_tx) = tokio::io::duplex(1024);
    let mut stdout = BufReader::new(out_rx).lines();
    let mut stderr = BufReader::new(err_rx).lines();

    err_tx
        .write_all(b"Error: listen EADDRINUSE: address already in use 0.0.0.0:4723\n")
        .await
        .unwrap();

    let err = wait_for_listener(&mut stdout, &mut stderr).await.unwrap_err();
    match err {
        AppiumError::Stderr(line) => assert!(line.contains("EADDRINUSE")),
        other => panic!("expected Stderr, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stdout_closing_first_is_exited_before_ready() {
    let (out_rx, mut out_tx) = tokio::io::duplex(1024);
    let (err_rx, err_tx) = tokio::io::duplex(1024);
    let mut stdout = BufReader::new(out_rx).lines();
    let mut stderr = BufReader::new(err_rx).lines();

    out_tx.write_all(b"[Appium] Welcome to Appium\n").await.unwrap();
    drop(out_tx);
    drop(err_tx);

    let err = wait_for_listener(&mut stdout, &mut stderr).await.unwrap_err();
    assert!(matches!(err, AppiumError::ExitedBeforeReady));
}
