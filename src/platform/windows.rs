use std::{
    os::windows::process::CommandExt,
    path::Path,
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use super::{
    LaunchCommand, Liveness, ProcessFactory, ProcessTree, ServiceKind, ServiceLaunch,
    ServiceProcessHandle, command::WINDOWS, prepare_command, probe_pid, snapshot_tree,
};
use crate::error::StackError;

/// `CREATE_NO_WINDOW`.
const CREATE_NO_WINDOW: u32 = 0x0800_0000;
/// `CREATE_NEW_PROCESS_GROUP`.
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
/// How long a killed root gets to disappear from the process table.
const ROOT_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Windows: no signal groups, so trees are discovered from the process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsFactory;

impl ProcessFactory for WindowsFactory {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn version_check_command(&self, java: &Path) -> Result<LaunchCommand, StackError> {
        Ok(WINDOWS.version_check(java))
    }

    fn service_command(&self, kind: ServiceKind, launch: &ServiceLaunch) -> Result<LaunchCommand, StackError> {
        Ok(WINDOWS.service(kind, launch))
    }

    fn launch(&self, kind: ServiceKind, command: LaunchCommand) -> Result<ServiceProcessHandle, StackError> {
        debug!("Launching {kind}: `{}`", command.display_line());
        let mut cmd = prepare_command(kind, &command)?;
        cmd.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);

        let child = cmd.spawn().map_err(|source| StackError::SpawnFailed {
            service: kind.to_string(),
            source,
        })?;
        info!("Started {kind} with PID {}", child.id());
        Ok(ServiceProcessHandle::spawned(kind, command, child, None))
    }

    fn open_default_browser(&self, url: &str) -> Result<(), StackError> {
        let mut child = Command::new("cmd")
            .args(["/C", "start", "", url])
            .creation_flags(CREATE_NO_WINDOW)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| StackError::SpawnFailed {
                service: "cmd".to_string(),
                source,
            })?;

        thread::spawn(move || {
            if let Err(err) = child.wait() {
                debug!("Browser helper could not be reaped: {err}");
            }
        });
        Ok(())
    }

    fn enumerate_process_tree(&self, handle: &ServiceProcessHandle) -> Result<ProcessTree, StackError> {
        Ok(snapshot_tree(handle.pid))
    }

    /// Forceful: console services started without a window cannot receive a polite close, so
    /// `grace` is not used here.
    fn terminate_tree(
        &self,
        handle: &mut ServiceProcessHandle,
        tree: &ProcessTree,
        _grace: Duration,
    ) -> Result<(), StackError> {
        let kind = handle.kind;
        let live: Vec<u32> = tree
            .members
            .iter()
            .copied()
            .filter(|pid| probe_pid(*pid) == Liveness::Running)
            .collect();
        if live.is_empty() {
            debug!("{kind} has no live processes left");
            return settle_root(handle);
        }

        let status = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &tree.root.to_string()])
            .creation_flags(CREATE_NO_WINDOW)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => return settle_root(handle),
            Ok(status) => debug!("taskkill for {kind} exited with {status}; killing members one by one"),
            Err(err) => debug!("taskkill unavailable ({err}); killing members one by one"),
        }

        // Children before parents so nothing respawns under a dying parent.
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let mut failed = Vec::new();
        for pid in live.iter().rev() {
            if let Some(process) = system.process(Pid::from_u32(*pid))
                && !process.kill()
            {
                failed.push(*pid);
            }
        }

        let survivors: Vec<u32> = failed
            .into_iter()
            .filter(|pid| probe_pid(*pid) == Liveness::Running)
            .collect();
        if !survivors.is_empty() {
            warn!("Could not terminate {kind} processes {survivors:?}");
            return Err(stop_failed(kind, format!("processes {survivors:?} survived")));
        }
        settle_root(handle)
    }
}

/// Collects the root once it is gone. A root that outlives [`ROOT_EXIT_TIMEOUT`] is a stop
/// failure and is left unreaped.
fn settle_root(handle: &mut ServiceProcessHandle) -> Result<(), StackError> {
    if handle.wait_exit(ROOT_EXIT_TIMEOUT) {
        return Ok(());
    }
    warn!("{} (PID {}) is still running after being killed", handle.kind, handle.pid);
    Err(stop_failed(handle.kind, format!("PID {} survived", handle.pid)))
}

fn stop_failed(kind: ServiceKind, reason: String) -> StackError {
    StackError::StopFailed {
        service: kind.to_string(),
        source: std::io::Error::other(reason),
    }
}
