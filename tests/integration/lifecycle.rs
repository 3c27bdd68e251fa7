#![cfg(unix)]

mod common;

use std::{fs, sync::mpsc, thread, time::Duration};

use common::{
    descendants, is_process_alive, stack_fetcher, stack_settings, wait_for_lines,
    wait_for_process_exit,
};
use stackrun::{
    coordinator::{Coordinator, StackState},
    pidfile::PidFile,
    platform::{ServiceKind, host_factory},
    provision::Provisioner,
};
use tempfile::tempdir;

fn coordinator(settings: &stackrun::config::Settings) -> Coordinator {
    Coordinator::new(
        host_factory(),
        Provisioner::new(Box::new(stack_fetcher())),
        settings.plan(),
    )
}

#[test]
fn start_then_stop_kills_every_service_tree() {
    let dir = tempdir().unwrap();
    let settings = stack_settings(dir.path(), false);
    let mut stack = coordinator(&settings);

    stack.provision().unwrap();
    stack.start().unwrap();
    assert_eq!(stack.state(), StackState::Running);

    let kinds: Vec<_> = stack.handles().iter().map(|handle| handle.kind).collect();
    assert_eq!(
        kinds,
        vec![ServiceKind::Search, ServiceKind::WorkflowEngine, ServiceKind::Connectors]
    );

    let search_log = settings.layout.log_dir.join("elasticsearch.log");
    let lines = wait_for_lines(&search_log, 1);
    assert!(lines[0].starts_with("started "), "{lines:?}");
    let connectors_log = settings.layout.log_dir.join("connectors.log");
    let lines = wait_for_lines(&connectors_log, 1);
    assert!(lines[0].contains("io.camunda.connector.runtime.app.ConnectorRuntimeApplication"));

    let mut pids: Vec<u32> = stack.handles().iter().map(|handle| handle.pid).collect();
    thread::sleep(Duration::from_millis(300));
    for root in pids.clone() {
        pids.extend(descendants(root));
    }
    assert!(pids.len() > 3, "expected grandchildren, got {pids:?}");
    for pid in &pids {
        assert!(is_process_alive(*pid), "pid {pid} not running");
    }

    stack.stop().unwrap();
    assert_eq!(stack.state(), StackState::Stopped);
    assert!(stack.handles().is_empty());
    for pid in pids {
        wait_for_process_exit(pid);
    }

    stack.stop().unwrap();
    assert_eq!(stack.state(), StackState::Stopped);
}

#[test]
fn shutdown_signal_ends_foreground_run() {
    let dir = tempdir().unwrap();
    let settings = stack_settings(dir.path(), false);
    let mut stack = coordinator(&settings);
    let (sender, receiver) = mpsc::channel();

    let trigger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(800));
        sender.send(()).unwrap();
    });

    stack.run(&receiver).unwrap();
    trigger.join().unwrap();

    assert_eq!(stack.state(), StackState::Stopped);
    assert!(stack.handles().is_empty());
}

#[test]
fn detached_services_are_stopped_from_the_pid_file() {
    let dir = tempdir().unwrap();
    let settings = stack_settings(dir.path(), true);
    let pid_file = settings.layout.pid_file();

    let mut stack = coordinator(&settings);
    stack.provision().unwrap();
    stack.start().unwrap();
    let record = stack.detach(&pid_file).unwrap();

    assert_eq!(record.entries().len(), 3);
    let pids: Vec<u32> = record.entries().iter().map(|entry| entry.pid).collect();
    for pid in &pids {
        assert!(is_process_alive(*pid));
    }

    let loaded = PidFile::load(&pid_file).unwrap();
    assert_eq!(loaded, record);

    let mut stopper = coordinator(&settings);
    stopper.adopt(&loaded).unwrap();
    stopper.stop().unwrap();
    PidFile::remove(&pid_file).unwrap();

    for pid in pids {
        wait_for_process_exit(pid);
    }
    assert!(!pid_file.exists());
}

#[test]
fn missing_launcher_rolls_back_started_services() {
    let dir = tempdir().unwrap();
    let settings = stack_settings(dir.path(), false);
    let mut stack = coordinator(&settings);
    stack.provision().unwrap();

    fs::remove_file(
        settings
            .layout
            .install_dir
            .join("camunda-zeebe-8.5.0/bin/camunda"),
    )
    .unwrap();

    let err = stack.start().unwrap_err();

    assert!(err.to_string().contains("camunda"), "{err}");
    assert_eq!(stack.state(), StackState::Failed);
    assert!(stack.handles().is_empty());
}

#[test]
fn stale_pid_file_entry_leaves_unrelated_process_alone() {
    use std::{os::unix::process::CommandExt, process::Command};

    use stackrun::platform::{LaunchCommand, ServiceProcessHandle};

    let dir = tempdir().unwrap();
    let settings = stack_settings(dir.path(), true);
    let mut unrelated = Command::new("sleep").arg("30").process_group(0).spawn().unwrap();

    let recorded_start = chrono::DateTime::from_timestamp(978_307_200, 0).unwrap();
    let entry = ServiceProcessHandle::adopt(
        ServiceKind::WorkflowEngine,
        LaunchCommand::new("/opt/c8/camunda-zeebe-8.5.0/bin/camunda", Vec::new()),
        unrelated.id(),
        Some(unrelated.id()),
        recorded_start,
    );
    let record = PidFile::from_handles([&entry]);

    let mut stopper = coordinator(&settings);
    stopper.adopt(&record).unwrap();
    stopper.stop().unwrap();

    thread::sleep(Duration::from_millis(200));
    let status = unrelated.try_wait().unwrap();
    let _ = unrelated.kill();
    let _ = unrelated.wait();
    assert!(status.is_none(), "unrelated process was signalled: {status:?}");
}
