use std::{
    os::unix::process::CommandExt,
    path::Path,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::{self, Pid},
};
use tracing::{debug, info, warn};

use super::{
    LaunchCommand, ProcessFactory, ProcessTree, ServiceKind, ServiceLaunch, ServiceProcessHandle,
    command::UNIX, prepare_command,
};
use crate::error::StackError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Linux and macOS: every service leads its own process group.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixFactory;

/// What a termination signal is sent to.
#[derive(Debug, Clone, Copy)]
enum Target {
    Group(Pid),
    Process(Pid),
}

impl Target {
    fn for_tree(tree: &ProcessTree) -> Self {
        let own_group = unistd::getpgrp();
        match tree.group {
            // Never signal our own group, that would take this process down too.
            Some(group) if group as i32 != own_group.as_raw() => Target::Group(Pid::from_raw(group as i32)),
            _ => Target::Process(Pid::from_raw(tree.root as i32)),
        }
    }

    fn send(self, sig: Option<Signal>) -> Result<(), Errno> {
        match self {
            Target::Group(group) => signal::killpg(group, sig),
            Target::Process(pid) => signal::kill(pid, sig),
        }
    }

    /// Whether any process is still addressed by this target.
    fn alive(self) -> bool {
        !matches!(self.send(None), Err(Errno::ESRCH))
    }
}

fn stop_failed(service: ServiceKind, err: Errno) -> StackError {
    StackError::StopFailed {
        service: service.to_string(),
        source: std::io::Error::from_raw_os_error(err as i32),
    }
}

impl ProcessFactory for UnixFactory {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn version_check_command(&self, java: &Path) -> Result<LaunchCommand, StackError> {
        Ok(UNIX.version_check(java))
    }

    fn service_command(&self, kind: ServiceKind, launch: &ServiceLaunch) -> Result<LaunchCommand, StackError> {
        Ok(UNIX.service(kind, launch))
    }

    fn launch(&self, kind: ServiceKind, command: LaunchCommand) -> Result<ServiceProcessHandle, StackError> {
        debug!("Launching {kind}: `{}`", command.display_line());
        let mut cmd = prepare_command(kind, &command)?;

        #[cfg_attr(not(target_os = "linux"), allow(unused_variables))]
        let detached = command.detached;
        unsafe {
            cmd.pre_exec(move || {
                // Own process group so the whole service tree can be signalled at once
                // without touching ours.
                if libc::setpgid(0, 0) < 0 {
                    return Err(std::io::Error::last_os_error());
                }

                #[cfg(target_os = "linux")]
                if !detached {
                    use libc::{PR_SET_PDEATHSIG, SIGTERM, prctl};
                    if prctl(PR_SET_PDEATHSIG, SIGTERM, 0, 0, 0) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }

                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|source| StackError::SpawnFailed {
            service: kind.to_string(),
            source,
        })?;
        let pid = child.id();
        info!("Started {kind} with PID {pid}");

        // setpgid(0, 0) makes the child the leader of a group named after its PID.
        Ok(ServiceProcessHandle::spawned(kind, command, child, Some(pid)))
    }

    fn open_default_browser(&self, url: &str) -> Result<(), StackError> {
        let opener = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
        let mut child = Command::new(opener)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| StackError::SpawnFailed {
                service: opener.to_string(),
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
        let group = handle.group.or_else(|| {
            unistd::getpgid(Some(Pid::from_raw(handle.pid as i32)))
                .ok()
                .map(|pgid| pgid.as_raw() as u32)
        });
        // Group membership covers the descendants.
        Ok(ProcessTree::root_only(handle.pid, group, true))
    }

    fn terminate_tree(
        &self,
        handle: &mut ServiceProcessHandle,
        tree: &ProcessTree,
        grace: Duration,
    ) -> Result<(), StackError> {
        let kind = handle.kind;
        let mut target = Target::for_tree(tree);

        match target.send(Some(Signal::SIGTERM)) {
            Ok(()) => debug!("Sent SIGTERM to {kind} ({target:?})"),
            Err(Errno::ESRCH) => {
                debug!("{kind} has no live processes left");
                handle.reap();
                return Ok(());
            }
            Err(Errno::EPERM) if matches!(target, Target::Group(_)) => {
                warn!("Insufficient permissions to signal the {kind} process group; signalling PID {} directly", tree.root);
                target = Target::Process(Pid::from_raw(tree.root as i32));
                match target.send(Some(Signal::SIGTERM)) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(err) => return Err(stop_failed(kind, err)),
                }
            }
            Err(err) => return Err(stop_failed(kind, err)),
        }

        let deadline = Instant::now() + grace;
        loop {
            // Reaping the root first keeps a zombie from holding the group open.
            handle.poll();
            if !target.alive() {
                debug!("{kind} exited after SIGTERM");
                handle.reap();
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        warn!("{kind} did not exit within {grace:?}; sending SIGKILL");
        match target.send(Some(Signal::SIGKILL)) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => return Err(stop_failed(kind, err)),
        }
        handle.reap();
        Ok(())
    }
}
