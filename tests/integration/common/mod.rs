#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use stackrun::{
    archive::{self, ArchiveEntry, ArchiveFormat},
    config::{Config, Overrides, Settings},
    error::StackError,
    fetch::Fetch,
};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

pub const CAMUNDA_VERSION: &str = "8.5.0";
pub const ELASTICSEARCH_VERSION: &str = "8.13.4";

/// Serves canned bodies keyed by a URL substring and records every request.
#[derive(Default)]
pub struct CannedFetcher {
    bodies: Vec<(String, Vec<u8>)>,
    pub requests: RefCell<Vec<String>>,
}

impl CannedFetcher {
    pub fn with(mut self, url_part: &str, body: Vec<u8>) -> Self {
        self.bodies.push((url_part.to_string(), body));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Fetch for CannedFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, StackError> {
        self.requests.borrow_mut().push(url.to_string());
        let body = self
            .bodies
            .iter()
            .find(|(part, _)| url.contains(part.as_str()))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| StackError::DownloadFailed {
                url: url.to_string(),
                reason: "bad status: 404 Not Found".into(),
            })?;
        sink.write_all(&body)?;
        Ok(body.len() as u64)
    }
}

/// Builds an archive in memory from `(path, mode, contents)` triples; a `None` body is a directory.
pub fn archive_bytes(format: ArchiveFormat, entries: &[(&str, u32, Option<&str>)]) -> Vec<u8> {
    let entries = entries.iter().map(|(path, mode, body)| {
        Ok(match body {
            Some(body) => ArchiveEntry::file(*path, *mode, body.len() as u64, body.as_bytes()),
            None => ArchiveEntry::directory(*path, *mode),
        })
    });
    archive::write_archive(entries, Cursor::new(Vec::new()), format)
        .unwrap()
        .into_inner()
}

/// Shell script that writes a marker line, leaves a grandchild behind and waits on it.
pub const LONG_RUNNING_SCRIPT: &str = "#!/bin/sh\necho \"started $0\"\nsleep 60 &\nwait\n";

/// Canned downloads for the three distributions with runnable launch scripts.
pub fn stack_fetcher() -> CannedFetcher {
    let search = archive_bytes(
        ArchiveFormat::TarGz,
        &[
            ("elasticsearch-8.13.4", 0o755, None),
            ("elasticsearch-8.13.4/bin", 0o755, None),
            ("elasticsearch-8.13.4/bin/elasticsearch", 0o755, Some(LONG_RUNNING_SCRIPT)),
        ],
    );
    let engine = archive_bytes(
        ArchiveFormat::TarGz,
        &[
            ("camunda-zeebe-8.5.0", 0o755, None),
            ("camunda-zeebe-8.5.0/bin", 0o755, None),
            ("camunda-zeebe-8.5.0/bin/camunda", 0o755, Some(LONG_RUNNING_SCRIPT)),
            ("camunda-zeebe-8.5.0/lib", 0o755, None),
            ("camunda-zeebe-8.5.0/lib/zeebe.jar", 0o644, Some("jar")),
        ],
    );
    CannedFetcher::default()
        .with("elasticsearch", search)
        .with("camunda-zeebe", engine)
        .with("connector-runtime-bundle", b"PK connectors".to_vec())
}

/// Writes an executable file.
pub fn write_executable(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// Fake `java` that answers the version check and otherwise keeps running.
pub fn fake_java(dir: &Path) -> PathBuf {
    let java = dir.join("jdk/bin/java");
    write_executable(
        &java,
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo 'openjdk 21.0.2'; exit 0; fi\necho \"connectors $*\"\nexec sleep 60\n",
    );
    java
}

/// Settings for a stack installed under `root` with a fake JDK and no browser.
pub fn stack_settings(root: &Path, detached: bool) -> Settings {
    let config = Config {
        camunda_version: Some(CAMUNDA_VERSION.into()),
        elasticsearch_version: Some(ELASTICSEARCH_VERSION.into()),
        install_dir: Some(root.join("c8run")),
        java: Some(fake_java(root)),
        open_browser: Some(false),
        shutdown_grace: Some("2s".into()),
        ..Config::default()
    };
    let settings = config
        .settings(&Overrides {
            detached,
            ..Overrides::default()
        })
        .unwrap();
    settings.layout.create_dirs().unwrap();
    fs::write(
        settings
            .layout
            .install_dir
            .join("connectors-application.properties"),
        "server.port=8085\n",
    )
    .unwrap();
    settings
}

pub fn wait_for_lines(path: &Path, expected: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path) {
            let lines: Vec<_> = content.lines().map(|line| line.to_string()).collect();
            if lines.len() >= expected {
                return lines;
            }
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for {expected} lines in {:?}", path);
        }

        thread::sleep(Duration::from_millis(100));
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    match system.process(Pid::from_u32(pid)) {
        Some(process) => !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
        None => false,
    }
}

pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if !is_process_alive(pid) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for PID {} to exit", pid);
}

/// Direct and indirect children of `root`.
pub fn descendants(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent.as_u32()).or_default().push(pid.as_u32());
        }
    }

    let mut found = Vec::new();
    let mut queue = vec![root];
    while let Some(pid) = queue.pop() {
        if let Some(kids) = children.get(&pid) {
            found.extend(kids.iter().copied());
            queue.extend(kids.iter().copied());
        }
    }
    found
}
