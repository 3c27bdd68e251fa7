use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{platform::ServiceKind, runtime::RuntimeLayout};

/// Opens `path` for appending, creating it and its parent directories when missing.
pub fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Location of a service's combined stdout/stderr log.
pub fn service_log_path(layout: &RuntimeLayout, kind: ServiceKind) -> PathBuf {
    layout.log_dir.join(kind.log_file_name())
}

/// Deletes the log files of every service. Missing files are ignored.
pub fn remove_service_logs(layout: &RuntimeLayout) -> io::Result<usize> {
    let mut removed = 0;
    for kind in ServiceKind::STARTUP_ORDER {
        let path = service_log_path(layout, kind);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                removed += 1;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    if removed > 0 {
        info!("Removed {removed} service log file(s)");
    }
    Ok(removed)
}

/// Returns the last `lines` lines of a log file, or nothing if it was never written.
///
/// # Arguments
/// * `path` - The log file.
/// * `lines` - Maximum number of lines to return.
pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();
    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].to_vec())
}
