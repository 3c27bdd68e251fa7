//! Idempotent download and extraction of distributions.
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{
    archive,
    distribution::DistributionArtifact,
    error::StackError,
    fetch::{Fetch, HttpFetcher},
};

/// Makes distributions available on local disk, touching the network only when needed.
pub struct Provisioner {
    fetcher: Box<dyn Fetch>,
}

impl Provisioner {
    /// Wraps an arbitrary fetcher.
    pub fn new(fetcher: Box<dyn Fetch>) -> Self {
        Self { fetcher }
    }

    /// Provisioner backed by [`HttpFetcher`].
    pub fn http() -> Result<Self, StackError> {
        Ok(Self::new(Box::new(HttpFetcher::new()?)))
    }

    /// See [`ensure`].
    pub fn ensure(&self, artifact: &DistributionArtifact) -> Result<PathBuf, StackError> {
        ensure(artifact, self.fetcher.as_ref())
    }
}

/// Ensures `artifact` is downloaded and extracted, returning its installed path.
///
/// A present archive is never downloaded again and a present extraction directory is never
/// touched. Downloads land in a temporary file beside the archive and are renamed into place once
/// complete; extraction happens in a staging directory that is renamed onto the final path.
pub fn ensure(artifact: &DistributionArtifact, fetcher: &dyn Fetch) -> Result<PathBuf, StackError> {
    if artifact.format.is_some() && artifact.extracted_path.exists() {
        debug!(
            "{} {} already installed at {}",
            artifact.name,
            artifact.version,
            artifact.extracted_path.display()
        );
        return Ok(artifact.extracted_path.clone());
    }

    download_if_missing(artifact, fetcher)?;

    let Some(format) = artifact.format else {
        return Ok(artifact.archive_path.clone());
    };

    let staging = staging_dir(&artifact.extracted_path);
    if staging.exists() {
        warn!("Removing stale staging directory {}", staging.display());
        fs::remove_dir_all(&staging)?;
    }

    info!(
        "Extracting {} into {}",
        artifact.archive_path.display(),
        artifact.extracted_path.display()
    );
    archive::extract_file(&artifact.archive_path, format, &staging)?;

    let result = promote_staging(&staging, &artifact.extracted_path);
    if staging.exists() {
        let _ = fs::remove_dir_all(&staging);
    }
    result?;

    Ok(artifact.extracted_path.clone())
}

fn download_if_missing(artifact: &DistributionArtifact, fetcher: &dyn Fetch) -> Result<(), StackError> {
    if artifact.archive_path.exists() {
        debug!("Using cached {}", artifact.archive_path.display());
        return Ok(());
    }

    let parent = artifact
        .archive_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let temp = tempfile::Builder::new()
        .prefix(".download-")
        .suffix(".part")
        .tempfile_in(parent)?;
    let mut writer = BufWriter::new(temp);
    let bytes = fetcher.fetch(&artifact.source_url, &mut writer)?;
    writer.flush()?;
    let temp = writer.into_inner().map_err(|err| err.into_error())?;

    temp.persist(&artifact.archive_path)
        .map_err(|err| StackError::Io(err.error))?;
    info!(
        "Saved {} ({bytes} bytes) to {}",
        artifact.name,
        artifact.archive_path.display()
    );
    Ok(())
}

fn staging_dir(extracted: &Path) -> PathBuf {
    let name = extracted
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    extracted.with_file_name(format!(".{name}.partial"))
}

/// Moves the extracted tree into its final location.
///
/// Distributions wrap their content in a single top-level folder; that folder becomes the
/// extraction directory. Anything else is promoted as-is.
fn promote_staging(staging: &Path, target: &Path) -> Result<(), StackError> {
    let children = fs::read_dir(staging)?.collect::<Result<Vec<_>, _>>()?;
    let source = match children.as_slice() {
        [only] if only.file_type()?.is_dir() => only.path(),
        _ => staging.to_path_buf(),
    };

    if target.exists() {
        warn!("{} appeared during extraction; keeping it", target.display());
        return Ok(());
    }
    fs::rename(&source, target)?;
    Ok(())
}

/// Deletes the extracted directory of an archive artifact, keeping the cached archive.
///
/// Plain-file artifacts are left alone. Returns whether anything was removed.
pub fn remove_extracted(artifact: &DistributionArtifact) -> Result<bool, StackError> {
    if artifact.format.is_none() || !artifact.extracted_path.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(&artifact.extracted_path)?;
    info!("Removed {}", artifact.extracted_path.display());
    Ok(true)
}
