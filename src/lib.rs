//! Stackrun provisions and runs a local Camunda stack: it downloads and unpacks the
//! Elasticsearch, Camunda and connector distributions, starts them as coordinated process
//! trees, tears them down in reverse order and can re-package the provisioned tree into a
//! distributable bundle.

/// Tar.gz and zip reading, writing and safe extraction.
pub mod archive;

/// Bundle packaging.
pub mod bundle;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Stack lifecycle state machine.
pub mod coordinator;

/// Distribution naming and download locations.
pub mod distribution;

/// Error handling.
pub mod error;

/// HTTP downloads.
pub mod fetch;

/// Service log files.
pub mod logs;

/// Detached service records.
pub mod pidfile;

/// Process creation and termination per operating system.
pub mod platform;

/// Download and extraction of distributions.
pub mod provision;

/// Runtime directory layout.
pub mod runtime;

#[cfg(test)]
pub mod test_utils;
