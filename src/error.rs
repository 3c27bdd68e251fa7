//! Error handling for stackrun.
use std::path::PathBuf;

use thiserror::Error;

use crate::coordinator::StackState;

/// Errors raised while reading, writing or extracting an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Headers could not be parsed or the compressed stream is damaged.
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// An entry transferred a different number of bytes than its header declares.
    #[error("Entry '{}' declares {expected} bytes but {actual} were transferred", .path.display())]
    SizeMismatch {
        /// Path of the entry inside the archive.
        path: PathBuf,
        /// Size recorded in the entry header.
        expected: u64,
        /// Bytes actually copied.
        actual: u64,
    },

    /// An entry resolves to a location outside of the extraction directory.
    #[error("Entry '{}' escapes destination '{}'", .path.display(), .destination.display())]
    PathTraversal {
        /// Path of the offending entry as recorded in the archive.
        path: PathBuf,
        /// Canonical extraction directory.
        destination: PathBuf,
    },

    /// Filesystem or stream error while handling the archive.
    #[error("Archive I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => ArchiveError::Io(io),
            other => ArchiveError::CorruptArchive(other.to_string()),
        }
    }
}

/// Error type for PID file operations.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// Error reading or writing the PID file.
    #[error("Failed to access PID file: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing the PID file.
    #[error("Failed to parse PID file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Defines all possible errors raised while provisioning, running or packaging the stack.
#[derive(Debug, Error)]
pub enum StackError {
    /// Network transfer failed or the server answered with anything but `200 OK`.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed {
        /// Source URL of the artifact.
        url: String,
        /// Transport error or unexpected status.
        reason: String,
    },

    /// Integrity or security failure in the archive codec.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The operating system refused to create a service process.
    #[error("Failed to start {service}: {source}")]
    SpawnFailed {
        /// Service (or helper) that failed to start.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A service process tree could not be signalled.
    #[error("Failed to stop {service}: {source}")]
    StopFailed {
        /// Service that failed to stop.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The capability is not implemented for the host platform.
    #[error("'{operation}' is not supported on this platform")]
    UnsupportedPlatform {
        /// Name of the capability that was requested.
        operation: &'static str,
    },

    /// Best-effort enumeration could not find every descendant. Reported as a warning.
    #[error("Process tree rooted at PID {root} could not be fully enumerated")]
    ProcessTreeIncomplete {
        /// Root PID of the tree.
        root: u32,
    },

    /// The coordinator was asked for a transition its state machine does not allow.
    #[error("Cannot move stack from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: StackState,
        /// Requested state.
        to: StackState,
    },

    /// Error reading a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigRead(std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference in the configuration has no value.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A duration setting could not be parsed.
    #[error("Invalid duration '{0}' (expected <number>[s|m|h])")]
    InvalidDuration(String),

    /// Error for PID file.
    #[error("PID file error: {0}")]
    PidFile(#[from] PidFileError),

    /// The bundle output already exists and bundles are write-once.
    #[error("Bundle output '{}' already exists", .0.display())]
    BundleExists(PathBuf),

    /// A manifest entry of the bundle is missing on disk.
    #[error("Bundle manifest path '{}' does not exist", .0.display())]
    MissingBundlePath(PathBuf),

    /// Generic filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StackError {
    /// Whether the error signals damaged or malicious archive content.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            StackError::Archive(
                ArchiveError::CorruptArchive(_)
                    | ArchiveError::SizeMismatch { .. }
                    | ArchiveError::PathTraversal { .. }
            )
        )
    }
}
