//! Command lines for the managed services.
//!
//! Construction is pure: every path is assembled as text from the [`CommandLayout`] of the target
//! platform, so the Windows layout can be checked on a Unix host and the other way round.
use std::{
    path::{Path, PathBuf},
    process::Command,
};

use serde::{Deserialize, Serialize};

use super::{ServiceKind, ServiceLaunch};

/// Main class of the connector runtime bundle.
pub const CONNECTORS_MAIN_CLASS: &str = "io.camunda.connector.runtime.app.ConnectorRuntimeApplication";

/// Properties file the connector runtime reads from the install directory.
pub const CONNECTORS_PROPERTIES: &str = "connectors-application.properties";

/// Flags that keep Elasticsearch light enough for a developer machine.
const SEARCH_FLAGS: [&str; 4] = [
    "-E",
    "xpack.ml.enabled=false",
    "-E",
    "xpack.security.enabled=false",
];

/// Fully resolved program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments, already split.
    pub args: Vec<String>,
    /// Directory the process starts in.
    pub working_dir: Option<PathBuf>,
    /// File receiving stdout and stderr; `None` inherits or captures them.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Whether the process must outlive this one.
    #[serde(default)]
    pub detached: bool,
}

impl LaunchCommand {
    /// Creates a command without working directory or log file.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            log_file: None,
            detached: false,
        }
    }

    /// Translates into a [`Command`] with program, arguments and working directory set.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Shell-like rendering for log output.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Platform conventions used while assembling command lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLayout {
    /// Directory separator.
    pub dir_separator: char,
    /// Separator between classpath entries.
    pub path_list_separator: char,
    /// Suffix appended to launcher scripts.
    pub script_suffix: &'static str,
    /// Interpreter and flag used to run launcher scripts, if they cannot be executed directly.
    pub script_shell: Option<(&'static str, &'static str)>,
}

/// Linux and macOS.
pub const UNIX: CommandLayout = CommandLayout {
    dir_separator: '/',
    path_list_separator: ':',
    script_suffix: "",
    script_shell: None,
};

/// Windows: `.bat` launchers run through `cmd /C`.
pub const WINDOWS: CommandLayout = CommandLayout {
    dir_separator: '\\',
    path_list_separator: ';',
    script_suffix: ".bat",
    script_shell: Some(("cmd", "/C")),
};

impl CommandLayout {
    fn join(&self, base: &Path, parts: &[&str]) -> PathBuf {
        let mut joined = base.display().to_string();
        for part in parts {
            if !joined.ends_with(self.dir_separator) {
                joined.push(self.dir_separator);
            }
            joined.push_str(part);
        }
        PathBuf::from(joined)
    }

    fn wildcard(&self, dir: &Path) -> String {
        self.join(dir, &["*"]).display().to_string()
    }

    fn script(&self, script: PathBuf, args: Vec<String>) -> LaunchCommand {
        match self.script_shell {
            Some((shell, flag)) => {
                let mut wrapped = vec![flag.to_string(), script.display().to_string()];
                wrapped.extend(args);
                LaunchCommand::new(shell, wrapped)
            }
            None => LaunchCommand::new(script, args),
        }
    }

    /// `<java> --version`.
    pub fn version_check(&self, java: &Path) -> LaunchCommand {
        LaunchCommand::new(java, vec!["--version".to_string()])
    }

    /// Classpath of the connector runtime: bundled jars, custom connectors, then the workflow
    /// engine's libraries.
    pub fn connectors_classpath(
        &self,
        install_dir: &Path,
        custom_connectors_dir: &Path,
        camunda_version: &str,
    ) -> String {
        let camunda_dir = format!("camunda-zeebe-{camunda_version}");
        let camunda_lib = self.join(install_dir, &[camunda_dir.as_str(), "lib"]);
        [
            self.wildcard(install_dir),
            self.wildcard(custom_connectors_dir),
            self.wildcard(&camunda_lib),
        ]
        .join(&self.path_list_separator.to_string())
    }

    /// Command line for `kind`, with working directory, log file and detach flag filled in.
    pub fn service(&self, kind: ServiceKind, launch: &ServiceLaunch) -> LaunchCommand {
        let mut command = match kind {
            ServiceKind::Search => {
                let home = format!("elasticsearch-{}", launch.elasticsearch_version);
                let launcher = format!("elasticsearch{}", self.script_suffix);
                let script = self.join(&launch.install_dir, &[home.as_str(), "bin", launcher.as_str()]);
                self.script(script, SEARCH_FLAGS.iter().map(|s| s.to_string()).collect())
            }
            ServiceKind::WorkflowEngine => {
                let home = format!("camunda-zeebe-{}", launch.camunda_version);
                let launcher = format!("camunda{}", self.script_suffix);
                let script = self.join(&launch.install_dir, &[home.as_str(), "bin", launcher.as_str()]);
                let mut args = Vec::new();
                if let Some(config) = &launch.camunda_config {
                    args.push(format!("--spring.config.location={}", config.display()));
                }
                args.extend(launch.camunda_args.iter().cloned());
                self.script(script, args)
            }
            ServiceKind::Connectors => {
                let classpath = self.connectors_classpath(
                    &launch.install_dir,
                    &launch.custom_connectors_dir,
                    &launch.camunda_version,
                );
                let properties = self.join(&launch.install_dir, &[CONNECTORS_PROPERTIES]);
                LaunchCommand::new(
                    &launch.java,
                    vec![
                        "-classpath".to_string(),
                        classpath,
                        CONNECTORS_MAIN_CLASS.to_string(),
                        format!("--spring.config.location={}", properties.display()),
                    ],
                )
            }
        };

        command.working_dir = Some(launch.install_dir.clone());
        command.log_file = Some(launch.log_dir.join(kind.log_file_name()));
        command.detached = launch.detached;
        command
    }
}
