//! Runtime directory layout.
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

/// File inside the run directory recording detached services.
pub const PID_FILE_NAME: &str = "pids.json";

/// Where distributions, logs and runtime state live.
///
/// Every path is absolute, so nothing downstream depends on the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    /// Archives and extracted distributions.
    pub install_dir: PathBuf,
    /// Service log files.
    pub log_dir: PathBuf,
    /// PID file and other transient state.
    pub run_dir: PathBuf,
}

/// Makes `path` absolute relative to the current directory without touching the filesystem.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::path::absolute(path)
        .or_else(|_| env::current_dir().map(|cwd| cwd.join(path)))
        .unwrap_or_else(|_| path.to_path_buf())
}

impl RuntimeLayout {
    /// Layout rooted at `install_dir`, with state under `<install_dir>/run`.
    pub fn new(install_dir: impl AsRef<Path>, log_dir: impl AsRef<Path>) -> Self {
        let install_dir = absolutize(install_dir.as_ref());
        let log_dir = absolutize(log_dir.as_ref());
        let run_dir = install_dir.join("run");
        Self {
            install_dir,
            log_dir,
            run_dir,
        }
    }

    /// Path of the PID file.
    pub fn pid_file(&self) -> PathBuf {
        self.run_dir.join(PID_FILE_NAME)
    }

    /// Creates the install, log and run directories.
    pub fn create_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.install_dir)?;
        fs::create_dir_all(&self.log_dir)?;
        fs::create_dir_all(&self.run_dir)
    }
}
