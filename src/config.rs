//! Configuration management for stackrun.
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use regex::Regex;
use serde::Deserialize;

use crate::{
    coordinator::StackPlan,
    distribution::{self, TargetPlatform},
    error::StackError,
    platform::ServiceLaunch,
    runtime::RuntimeLayout,
};

/// Config file looked up in the current directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "stackrun.yaml";

const DEFAULT_CAMUNDA_VERSION: &str = "8.6.0";
const DEFAULT_ELASTICSEARCH_VERSION: &str = "8.13.4";
const DEFAULT_BROWSER_URL: &str = "http://localhost:8080/operate/login";
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Represents the structure of the configuration file. Every key is optional.
#[derive(Debug, Default, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Camunda (Zeebe) version.
    pub camunda_version: Option<String>,
    /// Elasticsearch version.
    pub elasticsearch_version: Option<String>,
    /// Connector runtime version; defaults to the Camunda version.
    pub connectors_version: Option<String>,
    /// Directory holding archives and extracted distributions.
    pub install_dir: Option<PathBuf>,
    /// Directory for service logs; defaults to `<install_dir>/log`.
    pub log_dir: Option<PathBuf>,
    /// Java binary.
    pub java: Option<PathBuf>,
    /// Spring configuration handed to Camunda.
    pub camunda_config: Option<PathBuf>,
    /// Extra Camunda arguments.
    #[serde(default)]
    pub camunda_args: Vec<String>,
    /// Directory with custom connector jars; defaults to `<install_dir>/custom_connectors`.
    pub custom_connectors_dir: Option<PathBuf>,
    /// Page opened after Camunda starts.
    pub browser_url: Option<String>,
    /// Whether to open the browser at all.
    pub open_browser: Option<bool>,
    /// Grace period before services are killed, e.g. `30s`.
    pub shutdown_grace: Option<String>,
    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub project_dir: Option<PathBuf>,
    /// File this configuration was read from.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Overrides {
    /// `--camunda-version`.
    pub camunda_version: Option<String>,
    /// `--elasticsearch-version`.
    pub elasticsearch_version: Option<String>,
    /// Trailing arguments for Camunda.
    pub camunda_args: Vec<String>,
    /// `--no-browser`.
    pub no_browser: bool,
    /// `--detached`.
    pub detached: bool,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Camunda (Zeebe) version.
    pub camunda_version: String,
    /// Elasticsearch version.
    pub elasticsearch_version: String,
    /// Connector runtime version.
    pub connectors_version: String,
    /// Runtime directories.
    pub layout: RuntimeLayout,
    /// Java binary.
    pub java: PathBuf,
    /// Spring configuration for Camunda.
    pub camunda_config: Option<PathBuf>,
    /// Extra Camunda arguments.
    pub camunda_args: Vec<String>,
    /// Custom connectors directory.
    pub custom_connectors_dir: PathBuf,
    /// Browser target, `None` when disabled.
    pub browser_url: Option<String>,
    /// Grace period before services are killed.
    pub shutdown_grace: Duration,
    /// Whether services outlive this process.
    pub detached: bool,
    /// Configuration file the settings came from, if any.
    pub config_file: Option<PathBuf>,
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").unwrap_or_else(|err| unreachable!("{err}"))
    })
}

/// Expands `$VAR` and `${VAR}` references. A reference to an unset variable is an error.
pub fn expand_env_vars(input: &str) -> Result<String, StackError> {
    let pattern = env_var_pattern();
    if let Some(missing) = pattern
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .find(|name| env::var(name).is_err())
    {
        return Err(StackError::MissingEnvVar(missing));
    }

    let result = pattern.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });
    Ok(result.into_owned())
}

/// Parses a user-facing duration string in the format `<number>[s|m|h]`.
pub fn parse_duration(raw: &str) -> Result<Duration, StackError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(StackError::InvalidDuration(raw.to_string()));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str
        .parse()
        .map_err(|_| StackError::InvalidDuration(raw.to_string()))?;

    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Loads and parses the configuration file, expanding environment variables.
///
/// Without an explicit path, `stackrun.yaml` in the current directory is used if it exists and
/// defaults apply otherwise. An explicit path that does not exist is an error.
pub fn load_config(config_path: Option<&str>) -> Result<Config, StackError> {
    let (config_path, required) = match config_path {
        Some(path) => (PathBuf::from(path), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    if !required && !config_path.exists() {
        let mut config = Config::default();
        config.project_dir = Some(crate::runtime::absolutize(Path::new(".")));
        return Ok(config);
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        StackError::ConfigRead(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded_content = expand_env_vars(&content)?;
    let mut config: Config = if expanded_content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&expanded_content)?
    };

    let base_path = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    config.project_dir = Some(crate::runtime::absolutize(base_path));
    config.source = Some(crate::runtime::absolutize(&config_path));
    Ok(config)
}

/// Java binary: `configured`, else `$JAVA_HOME/bin/java`, else `java` from `PATH`.
pub fn resolve_java(configured: Option<&Path>) -> PathBuf {
    if let Some(java) = configured {
        return java.to_path_buf();
    }
    match env::var_os("JAVA_HOME") {
        Some(home) if !home.is_empty() => {
            let binary = if cfg!(windows) { "java.exe" } else { "java" };
            PathBuf::from(home).join("bin").join(binary)
        }
        _ => PathBuf::from("java"),
    }
}

impl Config {
    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.project_dir {
            Some(base) => base.join(path),
            None => crate::runtime::absolutize(path),
        }
    }

    /// Applies `overrides` and defaults.
    pub fn settings(&self, overrides: &Overrides) -> Result<Settings, StackError> {
        let camunda_version = overrides
            .camunda_version
            .clone()
            .or_else(|| self.camunda_version.clone())
            .unwrap_or_else(|| DEFAULT_CAMUNDA_VERSION.to_string());
        let elasticsearch_version = overrides
            .elasticsearch_version
            .clone()
            .or_else(|| self.elasticsearch_version.clone())
            .unwrap_or_else(|| DEFAULT_ELASTICSEARCH_VERSION.to_string());
        let connectors_version = self
            .connectors_version
            .clone()
            .unwrap_or_else(|| camunda_version.clone());

        let install_dir = self.resolve_path(self.install_dir.as_deref().unwrap_or(Path::new(".")));
        let log_dir = self
            .log_dir
            .as_deref()
            .map(|dir| self.resolve_path(dir))
            .unwrap_or_else(|| install_dir.join("log"));
        let layout = RuntimeLayout::new(&install_dir, &log_dir);

        let custom_connectors_dir = self
            .custom_connectors_dir
            .as_deref()
            .map(|dir| self.resolve_path(dir))
            .unwrap_or_else(|| layout.install_dir.join("custom_connectors"));

        let java = resolve_java(self.java.as_deref());
        let camunda_config = self.camunda_config.as_deref().map(|path| self.resolve_path(path));

        let mut camunda_args = self.camunda_args.clone();
        camunda_args.extend(overrides.camunda_args.iter().cloned());

        let browser_url = if overrides.no_browser || self.open_browser == Some(false) {
            None
        } else {
            Some(
                self.browser_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BROWSER_URL.to_string()),
            )
        };

        let shutdown_grace = match &self.shutdown_grace {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_SHUTDOWN_GRACE,
        };

        Ok(Settings {
            camunda_version,
            elasticsearch_version,
            connectors_version,
            layout,
            java,
            camunda_config,
            camunda_args,
            custom_connectors_dir,
            browser_url,
            shutdown_grace,
            detached: overrides.detached,
            config_file: self.source.clone(),
        })
    }
}

impl Settings {
    /// Inputs for the service command lines.
    pub fn service_launch(&self) -> ServiceLaunch {
        ServiceLaunch {
            install_dir: self.layout.install_dir.clone(),
            camunda_version: self.camunda_version.clone(),
            elasticsearch_version: self.elasticsearch_version.clone(),
            java: self.java.clone(),
            custom_connectors_dir: self.custom_connectors_dir.clone(),
            camunda_config: self.camunda_config.clone(),
            camunda_args: self.camunda_args.clone(),
            log_dir: self.layout.log_dir.clone(),
            detached: self.detached,
        }
    }

    /// Distributions needed on `platform`, in provisioning order.
    pub fn artifacts(&self, platform: &TargetPlatform) -> Vec<distribution::DistributionArtifact> {
        let install_dir = &self.layout.install_dir;
        vec![
            distribution::search_engine(&self.elasticsearch_version, platform, install_dir),
            distribution::workflow_engine(&self.camunda_version, platform, install_dir),
            distribution::connector_runtime(&self.connectors_version, platform, install_dir),
        ]
    }

    /// Everything the coordinator needs to run the stack on this host.
    pub fn plan(&self) -> StackPlan {
        StackPlan {
            artifacts: self.artifacts(&TargetPlatform::host()),
            launch: self.service_launch(),
            browser_url: self.browser_url.clone(),
            shutdown_grace: self.shutdown_grace,
        }
    }
}
