//! Persistent record of detached services.
use std::{fs, io, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::PidFileError,
    platform::{LaunchCommand, ServiceKind, ServiceProcessHandle},
};

/// One running service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidEntry {
    /// Which service.
    pub service: ServiceKind,
    /// Root PID.
    pub pid: u32,
    /// Process group, if the platform has one.
    #[serde(default)]
    pub group: Option<u32>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Command that started the service.
    pub command: LaunchCommand,
}

impl PidEntry {
    /// Rebuilds a process handle for this entry.
    pub fn adopt(&self) -> ServiceProcessHandle {
        ServiceProcessHandle::adopt(
            self.service,
            self.command.clone(),
            self.pid,
            self.group,
            self.started_at,
        )
    }
}

/// Represents the PID file structure. Entries are kept in startup order.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct PidFile {
    services: Vec<PidEntry>,
}

impl PidFile {
    /// Snapshot of the given handles.
    pub fn from_handles<'a>(handles: impl IntoIterator<Item = &'a ServiceProcessHandle>) -> Self {
        let services = handles
            .into_iter()
            .map(|handle| PidEntry {
                service: handle.kind,
                pid: handle.pid,
                group: handle.group,
                started_at: handle.started_at,
                command: handle.command.clone(),
            })
            .collect();
        Self { services }
    }

    /// Loads the PID file, returning an empty record when it does not exist.
    pub fn load(path: &Path) -> Result<Self, PidFileError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str::<Self>(&contents)?)
    }

    /// Saves the record, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), PidFileError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Deletes the PID file. A missing file is not an error.
    pub fn remove(path: &Path) -> Result<(), PidFileError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Recorded services in startup order.
    pub fn entries(&self) -> &[PidEntry] {
        &self.services
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
