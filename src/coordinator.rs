//! Lifecycle of the whole stack: provision, start in order, wait, stop in reverse.
use std::{
    collections::HashSet,
    path::Path,
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::Duration,
};

use strum_macros::Display;
use tracing::{debug, error, info, warn};

use crate::{
    distribution::DistributionArtifact,
    error::StackError,
    logs,
    pidfile::PidFile,
    platform::{Liveness, ProcessFactory, ServiceKind, ServiceLaunch, ServiceProcessHandle},
    provision::Provisioner,
};

/// How often liveness is checked while waiting for shutdown.
const LIVENESS_INTERVAL: Duration = Duration::from_millis(500);

/// Log lines shown when a service exits on its own.
const EXIT_LOG_LINES: usize = 20;

/// Where the stack is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StackState {
    /// Nothing has happened yet.
    Idle,
    /// Distributions are being downloaded and extracted.
    Provisioning,
    /// Services are being launched.
    Starting,
    /// All services were launched.
    Running,
    /// Services are being terminated.
    Stopping,
    /// All services were terminated.
    Stopped,
    /// Provisioning, startup or shutdown failed.
    Failed,
}

/// What to provision and how to run it.
#[derive(Debug, Clone)]
pub struct StackPlan {
    /// Distributions to provision, in order.
    pub artifacts: Vec<DistributionArtifact>,
    /// Inputs for the service command lines.
    pub launch: ServiceLaunch,
    /// Page opened once the workflow engine is launched; `None` disables it.
    pub browser_url: Option<String>,
    /// Time services get to exit after the polite signal.
    pub shutdown_grace: Duration,
}

/// Drives the stack through [`StackState`] and owns every service handle.
pub struct Coordinator {
    factory: Box<dyn ProcessFactory>,
    provisioner: Provisioner,
    plan: StackPlan,
    state: StackState,
    handles: Vec<ServiceProcessHandle>,
    reported_exits: HashSet<ServiceKind>,
}

impl Coordinator {
    /// Creates an idle coordinator.
    pub fn new(factory: Box<dyn ProcessFactory>, provisioner: Provisioner, plan: StackPlan) -> Self {
        Self {
            factory,
            provisioner,
            plan,
            state: StackState::Idle,
            handles: Vec::new(),
            reported_exits: HashSet::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> StackState {
        self.state
    }

    /// Handles of the launched services, in startup order.
    pub fn handles(&self) -> &[ServiceProcessHandle] {
        &self.handles
    }

    fn transition(&mut self, allowed: &[StackState], to: StackState) -> Result<(), StackError> {
        if !allowed.contains(&self.state) {
            return Err(StackError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!("Stack state {} -> {to}", self.state);
        self.state = to;
        Ok(())
    }

    /// Downloads and extracts every distribution of the plan.
    pub fn provision(&mut self) -> Result<(), StackError> {
        self.provision_until(None).map(|_| ())
    }

    /// Returns `false` when a shutdown request cut provisioning short.
    fn provision_until(&mut self, shutdown: Option<&Receiver<()>>) -> Result<bool, StackError> {
        self.transition(&[StackState::Idle], StackState::Provisioning)?;

        for artifact in &self.plan.artifacts {
            if shutdown_requested(shutdown) {
                return Ok(false);
            }
            info!("Provisioning {} {}", artifact.name, artifact.version);
            if let Err(err) = self.provisioner.ensure(artifact) {
                error!("Provisioning {} failed: {err}", artifact.name);
                self.state = StackState::Failed;
                return Err(err);
            }
        }
        Ok(!shutdown_requested(shutdown))
    }

    /// Launches the services in startup order.
    ///
    /// On failure every service started so far is stopped again before the error is returned.
    pub fn start(&mut self) -> Result<(), StackError> {
        self.start_until(None).map(|_| ())
    }

    /// Like [`Coordinator::start`], but a message on `shutdown` stops the services launched so far
    /// and skips the rest. Returns `false` in that case.
    fn start_until(&mut self, shutdown: Option<&Receiver<()>>) -> Result<bool, StackError> {
        self.transition(&[StackState::Provisioning], StackState::Starting)?;
        info!("Starting services on {}", self.factory.name());

        match self.launch_all(shutdown) {
            Ok(true) => {
                self.state = StackState::Running;
                info!("All services started");
                Ok(true)
            }
            Ok(false) => {
                info!("Shutdown requested during startup");
                self.stop()?;
                Ok(false)
            }
            Err(err) => {
                error!("Startup failed: {err}");
                if !self.handles.is_empty() {
                    warn!("Stopping {} already started service(s)", self.handles.len());
                    if let Err(teardown) = self.teardown() {
                        warn!("Rollback incomplete: {teardown}");
                    }
                }
                self.state = StackState::Failed;
                Err(err)
            }
        }
    }

    fn launch_all(&mut self, shutdown: Option<&Receiver<()>>) -> Result<bool, StackError> {
        self.check_java()?;

        for kind in ServiceKind::STARTUP_ORDER {
            if shutdown_requested(shutdown) {
                return Ok(false);
            }
            let command = self.factory.service_command(kind, &self.plan.launch)?;
            let handle = self.factory.launch(kind, command)?;
            self.handles.push(handle);
            if shutdown_requested(shutdown) {
                return Ok(false);
            }

            if kind == ServiceKind::WorkflowEngine
                && let Some(url) = &self.plan.browser_url
            {
                info!("Opening {url}");
                if let Err(err) = self.factory.open_default_browser(url) {
                    warn!("Could not open browser: {err}");
                }
            }
        }
        Ok(true)
    }

    fn check_java(&self) -> Result<(), StackError> {
        let command = self.factory.version_check_command(&self.plan.launch.java)?;
        let output = command
            .to_command()
            .output()
            .map_err(|source| StackError::SpawnFailed {
                service: command.program.display().to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().next() {
            Some(line) if output.status.success() => info!("Using {line}"),
            _ => warn!(
                "`{}` exited with {}: {}",
                command.display_line(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
        Ok(())
    }

    /// Blocks until `shutdown` delivers a message or hangs up, or until every service has exited.
    ///
    /// Services that exit on their own are reported once; they are not restarted.
    pub fn wait_for_shutdown(&mut self, shutdown: &Receiver<()>) -> Result<(), StackError> {
        if self.state != StackState::Running {
            return Err(StackError::InvalidTransition {
                from: self.state,
                to: StackState::Stopping,
            });
        }

        loop {
            match shutdown.recv_timeout(LIVENESS_INTERVAL) {
                Ok(()) => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Shutdown channel closed");
                    return Ok(());
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.report_exits() {
                        warn!("Every service has exited");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Logs newly exited services. Returns whether all of them are gone.
    fn report_exits(&mut self) -> bool {
        let mut all_exited = true;
        for handle in &mut self.handles {
            match handle.poll() {
                Liveness::Running => all_exited = false,
                Liveness::Exited(code) => {
                    if !self.reported_exits.insert(handle.kind) {
                        continue;
                    }
                    match code {
                        Some(code) => warn!("{} (PID {}) exited with code {code}", handle.kind, handle.pid),
                        None => warn!("{} (PID {}) exited", handle.kind, handle.pid),
                    }
                    if let Some(log) = &handle.command.log_file
                        && let Ok(lines) = logs::tail(log, EXIT_LOG_LINES)
                    {
                        for line in lines {
                            warn!("[{}] {line}", handle.kind);
                        }
                    }
                }
            }
        }
        all_exited
    }

    /// Terminates every service in reverse startup order.
    ///
    /// Stopping an idle or already stopped stack does nothing.
    pub fn stop(&mut self) -> Result<(), StackError> {
        match self.state {
            StackState::Idle | StackState::Stopped => return Ok(()),
            StackState::Provisioning => {
                self.state = StackState::Stopped;
                return Ok(());
            }
            _ => {}
        }
        self.transition(
            &[StackState::Starting, StackState::Running, StackState::Failed],
            StackState::Stopping,
        )?;

        match self.teardown() {
            Ok(()) => {
                self.state = StackState::Stopped;
                info!("All services stopped");
                Ok(())
            }
            Err(err) => {
                self.state = StackState::Failed;
                Err(err)
            }
        }
    }

    /// Stops the owned handles, last started first. Handles that could not be stopped are kept.
    fn teardown(&mut self) -> Result<(), StackError> {
        let mut first_error = None;
        let mut survivors = Vec::new();

        while let Some(mut handle) = self.handles.pop() {
            // An adopted PID that is gone (or now belongs to someone else) must not be signalled.
            if !handle.is_spawned() && !handle.is_running() {
                info!("{} (PID {}) is no longer running", handle.kind, handle.pid);
                continue;
            }
            info!("Stopping {} (PID {})", handle.kind, handle.pid);
            let result = self
                .factory
                .enumerate_process_tree(&handle)
                .and_then(|tree| {
                    if !tree.complete {
                        warn!("{}", StackError::ProcessTreeIncomplete { root: tree.root });
                    }
                    self.factory
                        .terminate_tree(&mut handle, &tree, self.plan.shutdown_grace)
                });

            if let Err(err) = result {
                error!("Failed to stop {}: {err}", handle.kind);
                first_error.get_or_insert(err);
                survivors.push(handle);
            }
        }

        survivors.reverse();
        self.handles = survivors;
        first_error.map_or(Ok(()), Err)
    }

    /// Provisions, starts, waits for `shutdown`, then stops.
    ///
    /// A shutdown message that arrives while provisioning or starting aborts the remaining steps.
    pub fn run(&mut self, shutdown: &Receiver<()>) -> Result<(), StackError> {
        if !self.provision_until(Some(shutdown))? {
            info!("Shutdown requested during provisioning");
            return self.stop();
        }
        if !self.start_until(Some(shutdown))? {
            return Ok(());
        }
        let waited = self.wait_for_shutdown(shutdown);
        self.stop()?;
        waited
    }

    /// Records the running services in `pid_file` and releases them so they outlive this process.
    pub fn detach(mut self, pid_file: &Path) -> Result<PidFile, StackError> {
        if self.state != StackState::Running {
            return Err(StackError::InvalidTransition {
                from: self.state,
                to: StackState::Running,
            });
        }

        let record = PidFile::from_handles(&self.handles);
        record.save(pid_file)?;
        info!(
            "Recorded {} detached service(s) in {}",
            record.entries().len(),
            pid_file.display()
        );

        self.handles.clear();
        self.state = StackState::Stopped;
        Ok(record)
    }

    /// Takes ownership of services recorded by an earlier [`Coordinator::detach`].
    ///
    /// Moves an idle coordinator straight to [`StackState::Running`].
    pub fn adopt(&mut self, record: &PidFile) -> Result<(), StackError> {
        self.transition(&[StackState::Idle], StackState::Running)?;
        self.handles = record.entries().iter().map(|entry| entry.adopt()).collect();
        info!("Adopted {} running service(s)", self.handles.len());
        Ok(())
    }
}

/// Whether a shutdown message is pending. A closed channel is not a request.
fn shutdown_requested(shutdown: Option<&Receiver<()>>) -> bool {
    matches!(shutdown.map(Receiver::try_recv), Some(Ok(())))
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        warn!("Coordinator dropped with live services; stopping them");
        if let Err(err) = self.stop() {
            error!("Failed to stop services on drop: {err}");
        }
    }
}
