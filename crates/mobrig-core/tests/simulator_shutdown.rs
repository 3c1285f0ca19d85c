//! Simulator shutdown sequencing with a scripted `xcrun`.

mod common;

use std::time::Duration;

use common::ScriptedRunner;
use tokio::time::Instant;

use mobrig_core::command::CommandOutput;
use mobrig_core::simctl::{shutdown_booted_simulator, Simctl, SimctlError, SIMULATOR_GRACE};

const ONE_BOOTED: &str = r#"{"devices": {"com.apple.CoreSimulator.SimRuntime.iOS-17-0": [
    {"udid": "AAAA-1111", "name": "iPhone 15", "state": "Shutdown"},
    {"udid": "BBBB-2222", "name": "iPhone 15 Pro", "state": "Booted"}
]}}"#;

const NONE_BOOTED: &str = r#"{"devices": {"com.apple.CoreSimulator.SimRuntime.iOS-17-0": [
    {"udid": "AAAA-1111", "name": "iPhone 15", "state": "Shutdown"}
]}}"#;

#[tokio::test(start_paused = true)]
async fn test_shutdown_then_grace_then_killall() {
    let runner = ScriptedRunner::new(vec![CommandOutput::ok(ONE_BOOTED)], CommandOutput::ok(""));
    let start = Instant::now();

    shutdown_booted_simulator(&runner, SIMULATOR_GRACE).await.unwrap();

    assert_eq!(
        runner.call_lines(),
        vec![
            "xcrun simctl list devices -j",
            "xcrun simctl shutdown BBBB-2222",
            "killall -9 Simulator",
        ]
    );
    assert_eq!(start.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_nothing_booted_still_kills_leftovers() {
    let runner = ScriptedRunner::new(vec![CommandOutput::ok(NONE_BOOTED)], CommandOutput::ok(""));

    shutdown_booted_simulator(&runner, SIMULATOR_GRACE).await.unwrap();

    assert_eq!(
        runner.call_lines(),
        vec!["xcrun simctl list devices -j", "killall -9 Simulator"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_killall_failure_is_not_an_error() {
    let runner = ScriptedRunner::new(
        vec![
            CommandOutput::ok(ONE_BOOTED),
            CommandOutput::ok(""),
            CommandOutput::failed(1, "No matching processes belonging to you were found"),
        ],
        CommandOutput::ok(""),
    );

    shutdown_booted_simulator(&runner, SIMULATOR_GRACE).await.unwrap();
    assert_eq!(runner.calls().len(), 3);
}

#[tokio::test]
async fn test_shutdown_tolerates_already_shut_down() {
    let runner = ScriptedRunner::new(
        vec![CommandOutput::failed(
            149,
            "Unable to shutdown device in current state: Shutdown",
        )],
        CommandOutput::ok(""),
    );
    Simctl::new(&runner).shutdown("AAAA-1111").await.unwrap();
}

#[tokio::test]
async fn test_boot_tolerates_already_booted() {
    let runner = ScriptedRunner::new(
        vec![CommandOutput::failed(
            149,
            "Unable to boot device in current state: Booted",
        )],
        CommandOutput::ok(""),
    );
    Simctl::new(&runner).boot("BBBB-2222").await.unwrap();
    assert_eq!(runner.call_lines(), vec!["xcrun simctl boot BBBB-2222"]);
}

#[tokio::test]
async fn test_boot_invalid_device_fails() {
    let runner = ScriptedRunner::new(
        vec![CommandOutput::failed(148, "Invalid device: ZZZZ-0000")],
        CommandOutput::ok(""),
    );

    let err = Simctl::new(&runner).boot("ZZZZ-0000").await.unwrap_err();
    assert!(matches!(err, SimctlError::Command(_)));
    assert!(err.to_string().contains("Invalid device"));
}

#[tokio::test]
async fn test_list_failure_propagates() {
    let runner = ScriptedRunner::new(
        vec![CommandOutput::failed(72, "xcrun: error: unable to find utility \"simctl\"")],
        CommandOutput::ok(""),
    );

    let err = shutdown_booted_simulator(&runner, SIMULATOR_GRACE).await.unwrap_err();
    assert!(matches!(err, SimctlError::Command(_)));
    assert!(err.to_string().contains("unable to find utility"));
    assert_eq!(runner.calls().len(), 1);
}

#[tokio::test]
async fn test_booted_udid() {
    let runner = ScriptedRunner::always(ONE_BOOTED);
    assert_eq!(Simctl::new(&runner).booted_udid().await.unwrap(), "BBBB-2222");

    let runner = ScriptedRunner::always(NONE_BOOTED);
    assert!(matches!(
        Simctl::new(&runner).booted_udid().await,
        Err(SimctlError::NoBootedSimulator)
    ));
}
