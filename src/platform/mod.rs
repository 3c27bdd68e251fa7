//! Host-specific process creation, discovery and termination.
//!
//! The [`ProcessFactory`] trait is the only place platform differences live. One implementation is
//! picked by [`host_factory`] when the binary starts; shared code never branches on the platform.
use std::{
    fs,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::{error::StackError, logs};

/// Allowed drift between a recorded start time and the one the OS reports.
const START_TIME_TOLERANCE_SECS: i64 = 5;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub mod command;
mod tree;
#[cfg(unix)]
mod unix;
mod unsupported;
#[cfg(windows)]
mod windows;

pub use command::{CommandLayout, LaunchCommand};
pub use tree::snapshot_tree;
#[cfg(unix)]
pub use unix::UnixFactory;
pub use unsupported::UnsupportedFactory;
#[cfg(windows)]
pub use windows::WindowsFactory;

/// The services making up the stack.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
pub enum ServiceKind {
    /// Elasticsearch.
    #[strum(serialize = "elasticsearch")]
    #[serde(rename = "elasticsearch")]
    Search,
    /// Camunda with the embedded Zeebe broker.
    #[strum(serialize = "camunda")]
    #[serde(rename = "camunda")]
    WorkflowEngine,
    /// Connector runtime.
    #[strum(serialize = "connectors")]
    #[serde(rename = "connectors")]
    Connectors,
}

impl ServiceKind {
    /// Launch order; shutdown walks it backwards.
    pub const STARTUP_ORDER: [ServiceKind; 3] = [
        ServiceKind::Search,
        ServiceKind::WorkflowEngine,
        ServiceKind::Connectors,
    ];

    /// Name of the file capturing the service's output.
    pub fn log_file_name(&self) -> String {
        format!("{self}.log")
    }
}

/// Everything needed to build the command line of any service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLaunch {
    /// Directory holding the provisioned distributions.
    pub install_dir: PathBuf,
    /// Camunda (Zeebe) version.
    pub camunda_version: String,
    /// Elasticsearch version.
    pub elasticsearch_version: String,
    /// Java binary used by the connector runtime and the version check.
    pub java: PathBuf,
    /// Directory with additional connector jars.
    pub custom_connectors_dir: PathBuf,
    /// Optional Spring configuration passed to Camunda.
    pub camunda_config: Option<PathBuf>,
    /// Extra arguments appended to the Camunda command line.
    pub camunda_args: Vec<String>,
    /// Directory receiving `<service>.log` files.
    pub log_dir: PathBuf,
    /// Whether services should survive this process.
    pub detached: bool,
}

/// Last observed state of a service process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process was alive at the last probe.
    Running,
    /// The process is gone; the exit code is known only for processes this one spawned.
    Exited(Option<i32>),
}

/// A launched (or re-adopted) service process.
#[derive(Debug)]
pub struct ServiceProcessHandle {
    /// Which service this is.
    pub kind: ServiceKind,
    /// Command that started it.
    pub command: LaunchCommand,
    /// Root process id.
    pub pid: u32,
    /// Process group id, where the platform has one.
    pub group: Option<u32>,
    /// When the process was started.
    pub started_at: DateTime<Utc>,
    liveness: Liveness,
    child: Option<Child>,
}

impl ServiceProcessHandle {
    /// Wraps a child spawned by this process.
    pub fn spawned(kind: ServiceKind, command: LaunchCommand, child: Child, group: Option<u32>) -> Self {
        Self {
            kind,
            command,
            pid: child.id(),
            group,
            started_at: Utc::now(),
            liveness: Liveness::Running,
            child: Some(child),
        }
    }

    /// Re-creates a handle for a process started by an earlier invocation.
    ///
    /// The handle starts out exited unless `pid` is alive and was started at `started_at`, so a
    /// PID reused after a reboot is never mistaken for the service.
    pub fn adopt(
        kind: ServiceKind,
        command: LaunchCommand,
        pid: u32,
        group: Option<u32>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let liveness = match process_started_at(pid) {
            Some(actual) if (actual - started_at).num_seconds().abs() <= START_TIME_TOLERANCE_SECS => {
                Liveness::Running
            }
            Some(actual) => {
                warn!("PID {pid} started at {actual}, not at {started_at}; {kind} is no longer running");
                Liveness::Exited(None)
            }
            None => Liveness::Exited(None),
        };

        Self {
            kind,
            command,
            pid,
            group,
            started_at,
            liveness,
            child: None,
        }
    }

    /// Whether the handle owns the OS child object.
    pub fn is_spawned(&self) -> bool {
        self.child.is_some()
    }

    /// Refreshes and returns the liveness of the root process.
    ///
    /// Children spawned by this process are reaped here, so an exited service never lingers as
    /// a zombie that probes would still report as present.
    pub fn poll(&mut self) -> Liveness {
        if let Liveness::Exited(_) = self.liveness {
            return self.liveness;
        }

        self.liveness = match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => Liveness::Exited(status.code()),
                Ok(None) => Liveness::Running,
                Err(err) => {
                    debug!("try_wait on {} (PID {}) failed: {err}", self.kind, self.pid);
                    probe_pid(self.pid)
                }
            },
            None => probe_pid(self.pid),
        };
        self.liveness
    }

    /// Whether the root process is still alive.
    pub fn is_running(&mut self) -> bool {
        self.poll() == Liveness::Running
    }

    /// Polls the root until it exits or `timeout` passes. Never blocks on a live child.
    ///
    /// Returns whether the root exited; a spawned child is reaped by the poll that sees it exit.
    pub fn wait_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_running() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Waits for a spawned child that has been killed. No-op for adopted processes.
    pub fn reap(&mut self) {
        if let Some(child) = self.child.as_mut() {
            match child.wait() {
                Ok(status) => self.liveness = Liveness::Exited(status.code()),
                Err(err) => debug!("Failed to reap {} (PID {}): {err}", self.kind, self.pid),
            }
        } else {
            self.liveness = Liveness::Exited(None);
        }
    }
}

/// Start time reported by the OS for `pid`, to the second.
pub fn process_started_at(pid: u32) -> Option<DateTime<Utc>> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let process = system.process(pid)?;
    DateTime::from_timestamp(i64::try_from(process.start_time()).ok()?, 0)
}

/// Checks the process table for `pid`, treating zombies as exited.
pub fn probe_pid(pid: u32) -> Liveness {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) if !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) => {
            Liveness::Running
        }
        _ => Liveness::Exited(None),
    }
}

/// Processes that must be terminated together to stop one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTree {
    /// Root process id.
    pub root: u32,
    /// Process group covering the tree, if any.
    pub group: Option<u32>,
    /// Known members, root first, parents before children.
    pub members: Vec<u32>,
    /// Whether every descendant is known to be listed.
    pub complete: bool,
}

impl ProcessTree {
    /// A tree consisting of the root alone.
    pub fn root_only(root: u32, group: Option<u32>, complete: bool) -> Self {
        Self {
            root,
            group,
            members: vec![root],
            complete,
        }
    }
}

/// Platform capabilities needed to run the stack.
pub trait ProcessFactory {
    /// Short platform name used in logs.
    fn name(&self) -> &'static str;

    /// Command that prints the Java runtime version.
    fn version_check_command(&self, java: &Path) -> Result<LaunchCommand, StackError>;

    /// Command line for one of the services.
    fn service_command(&self, kind: ServiceKind, launch: &ServiceLaunch) -> Result<LaunchCommand, StackError>;

    /// Starts `command` in a new process group and returns its handle.
    fn launch(&self, kind: ServiceKind, command: LaunchCommand) -> Result<ServiceProcessHandle, StackError>;

    /// Opens `url` in the default browser without waiting for it.
    fn open_default_browser(&self, url: &str) -> Result<(), StackError>;

    /// Finds the processes belonging to the service behind `handle`.
    fn enumerate_process_tree(&self, handle: &ServiceProcessHandle) -> Result<ProcessTree, StackError>;

    /// Terminates every process of `tree`, escalating once `grace` expires.
    ///
    /// A tree whose processes are already gone counts as terminated.
    fn terminate_tree(
        &self,
        handle: &mut ServiceProcessHandle,
        tree: &ProcessTree,
        grace: Duration,
    ) -> Result<(), StackError>;
}

/// Factory for the platform this binary was built for.
pub fn host_factory() -> Box<dyn ProcessFactory> {
    #[cfg(unix)]
    {
        Box::new(UnixFactory)
    }
    #[cfg(windows)]
    {
        Box::new(WindowsFactory)
    }
    #[cfg(not(any(unix, windows)))]
    {
        Box::new(UnsupportedFactory)
    }
}

/// Builds the [`Command`] for a service with its output redirected to the log file.
pub(crate) fn prepare_command(kind: ServiceKind, command: &LaunchCommand) -> Result<Command, StackError> {
    let mut cmd = command.to_command();
    cmd.stdin(Stdio::null());

    match &command.log_file {
        Some(path) => {
            let stdout = logs::open_append(path).map_err(|source| StackError::SpawnFailed {
                service: kind.to_string(),
                source,
            })?;
            let stderr = stdout.try_clone().map_err(|source| StackError::SpawnFailed {
                service: kind.to_string(),
                source,
            })?;
            cmd.stdout(stdout).stderr(stderr);
        }
        None => {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    if let Some(dir) = &command.working_dir
        && !dir.is_dir()
    {
        fs::create_dir_all(dir).map_err(|source| StackError::SpawnFailed {
            service: kind.to_string(),
            source,
        })?;
    }

    debug!("Executing command: {cmd:?}");
    Ok(cmd)
}
