//! Command-line interface for stackrun.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for stackrun.
#[derive(Parser)]
#[command(name = "stackrun", version, author)]
#[command(
    about = "Provision and run a local Camunda stack (Elasticsearch, Camunda, connectors)",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for stackrun.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download missing distributions and start the stack.
    Start {
        /// Path to the configuration file (defaults to `stackrun.yaml` when present).
        #[arg(short, long)]
        config: Option<String>,

        /// Leave the services running and exit once they are started.
        #[arg(long)]
        detached: bool,

        /// Do not open the browser once Camunda is up.
        #[arg(long = "no-browser")]
        no_browser: bool,

        /// Camunda version to run.
        #[arg(long, value_name = "VERSION")]
        camunda_version: Option<String>,

        /// Elasticsearch version to run.
        #[arg(long, value_name = "VERSION")]
        elasticsearch_version: Option<String>,

        /// Extra arguments passed through to Camunda.
        #[arg(last = true)]
        camunda_args: Vec<String>,
    },

    /// Stop services started with `start --detached`.
    Stop {
        /// Path to the configuration file (defaults to `stackrun.yaml` when present).
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Build a distributable bundle of the stack for this platform.
    Package {
        /// Path to the configuration file (defaults to `stackrun.yaml` when present).
        #[arg(short, long)]
        config: Option<String>,

        /// Where to write the bundle (defaults to next to the install directory).
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Remove extracted distributions and service logs.
    Clean {
        /// Path to the configuration file (defaults to `stackrun.yaml` when present).
        #[arg(short, long)]
        config: Option<String>,
    },
}

impl Commands {
    /// Configuration path given to the command, if any.
    pub fn config(&self) -> Option<&str> {
        match self {
            Commands::Start { config, .. }
            | Commands::Stop { config }
            | Commands::Package { config, .. }
            | Commands::Clean { config } => config.as_deref(),
        }
    }
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
