//! OS process table lookups.
//!
//! The Appium server and running emulators are located by scanning the
//! process table for a command line containing a known string (binary path,
//! AVD name, VM name). [`ProcessTable`] abstracts the scan so the lookups can
//! be tested against a fixed list.

use std::path::{Path, PathBuf};

use sysinfo::{ProcessRefreshKind, System, UpdateKind};
use tracing::{debug, info};

use crate::command::{CommandError, CommandRunner};
use crate::host::HostOs;

/// A running process as seen in the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    /// The full command line, arguments joined with single spaces.
    pub cmdline: String,
}

/// Source of process snapshots.
pub trait ProcessTable: Send + Sync {
    fn processes(&self) -> Vec<ProcessInfo>;
}

/// Process table read from the live system via `sysinfo`.
///
/// Processes running this executable are left out: a `mobrig appium start`
/// wrapper carries the same launcher name and port as the server it owns.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn processes(&self) -> Vec<ProcessInfo> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_cmd(UpdateKind::Always)
                .with_exe(UpdateKind::OnlyIfNotSet),
        );
        let own = OwnImage::current();
        snapshot(
            sys.processes()
                .iter()
                .map(|(pid, process)| (pid.as_u32(), process.exe(), process.cmd())),
            &own,
        )
    }
}

/// Identity of the running executable.
#[derive(Debug, Clone)]
struct OwnImage {
    pid: u32,
    exe: Option<PathBuf>,
}

impl OwnImage {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            exe: std::env::current_exe().ok(),
        }
    }

    /// Whether a process is this one or another instance of this binary.
    ///
    /// The executable path is compared when known; otherwise argv[0] is
    /// compared by file stem, which is all some hosts expose for processes
    /// owned by other users.
    fn matches(&self, pid: u32, exe: Option<&Path>, cmd: &[String]) -> bool {
        if pid == self.pid {
            return true;
        }
        let Some(own) = self.exe.as_deref() else {
            return false;
        };
        match exe {
            Some(exe) if !exe.as_os_str().is_empty() => exe == own,
            _ => cmd
                .first()
                .and_then(|argv0| Path::new(argv0).file_stem())
                .is_some_and(|stem| Some(stem) == own.file_stem()),
        }
    }
}

fn snapshot<'a, I>(entries: I, own: &OwnImage) -> Vec<ProcessInfo>
where
    I: IntoIterator<Item = (u32, Option<&'a Path>, &'a [String])>,
{
    entries
        .into_iter()
        .filter(|(pid, exe, cmd)| !own.matches(*pid, *exe, cmd))
        .map(|(pid, _, cmd)| ProcessInfo {
            pid,
            cmdline: cmd.join(" "),
        })
        .filter(|p| !p.cmdline.is_empty())
        .collect()
}

impl ProcessTable for Vec<ProcessInfo> {
    fn processes(&self) -> Vec<ProcessInfo> {
        self.clone()
    }
}

/// Returns the first process whose command line contains `needle`.
pub fn find_by_cmdline(table: &dyn ProcessTable, needle: &str) -> Option<ProcessInfo> {
    let found = table
        .processes()
        .into_iter()
        .find(|p| p.cmdline.contains(needle));
    debug!(needle, pid = ?found.as_ref().map(|p| p.pid), "process lookup");
    found
}

/// Forcibly terminates `pid` using the host's kill command.
pub async fn kill_pid(
    runner: &dyn CommandRunner,
    host: HostOs,
    pid: u32,
) -> Result<(), CommandError> {
    let spec = host.kill_command(pid);
    info!(pid, command = %spec, "killing process");
    runner.output(&spec).await?.into_result(&spec)?;
    Ok(())
}
