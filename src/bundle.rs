//! Packaging a provisioned install directory into a distributable archive.
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::{
    archive::{self, ArchiveEntry, ArchiveFormat},
    distribution::TargetPlatform,
    error::{ArchiveError, StackError},
    platform::command::CONNECTORS_PROPERTIES,
    runtime::RuntimeLayout,
};

/// Top-level files shipped alongside the distributions when they exist in the install directory.
pub const BUNDLE_DOCS: [&str; 3] = ["README.md", "LICENSE", "NOTICE"];

/// One manifest item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleItem {
    /// File or directory under the bundle root, walked recursively.
    Tree(PathBuf),
    /// Directory shipped without its contents.
    EmptyDir(PathBuf),
    /// File from anywhere on disk, stored under `name`.
    File { source: PathBuf, name: PathBuf },
}

impl BundleItem {
    /// Path that has to exist before packaging starts.
    fn source(&self, root: &Path) -> Option<PathBuf> {
        match self {
            BundleItem::Tree(relative) => Some(root.join(relative)),
            BundleItem::EmptyDir(_) => None,
            BundleItem::File { source, .. } => Some(source.clone()),
        }
    }
}

/// Fixed manifest of items to ship, plus where the archive goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeBundle {
    /// Directory tree items are relative to.
    pub root: PathBuf,
    /// Top-level folder every entry is placed under.
    pub prefix: String,
    /// Items to include, in archive order.
    pub items: Vec<BundleItem>,
    /// Archive to create. Never overwritten.
    pub output: PathBuf,
}

/// `camunda8-run-<version>-<os>-<arch>.<ext>`.
pub fn bundle_file_name(camunda_version: &str, platform: &TargetPlatform, format: ArchiveFormat) -> String {
    format!(
        "camunda8-run-{camunda_version}-{}-{}.{}",
        platform.os,
        platform.arch,
        format.extension()
    )
}

impl RuntimeBundle {
    /// Manifest of a provisioned install: both distributions, the connector runtime and its
    /// properties file, an empty log directory and, when present, the custom connectors
    /// directory and [`BUNDLE_DOCS`].
    ///
    /// The archive lands next to the install directory unless `output` is given.
    pub fn standard(
        layout: &RuntimeLayout,
        camunda_version: &str,
        elasticsearch_version: &str,
        connectors_version: &str,
        platform: &TargetPlatform,
        output: Option<PathBuf>,
    ) -> Self {
        let root = layout.install_dir.clone();
        let prefix = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "c8run".to_string());

        let mut items = vec![
            BundleItem::Tree(PathBuf::from(format!("elasticsearch-{elasticsearch_version}"))),
            BundleItem::Tree(PathBuf::from(format!("camunda-zeebe-{camunda_version}"))),
            BundleItem::Tree(PathBuf::from(format!(
                "connector-runtime-bundle-{connectors_version}-with-dependencies.jar"
            ))),
            BundleItem::Tree(PathBuf::from(CONNECTORS_PROPERTIES)),
        ];
        // Logs stay behind; only the directory travels. One outside the install dir lands as `log`.
        let log_dir = layout
            .log_dir
            .strip_prefix(&root)
            .ok()
            .filter(|relative| !relative.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("log"));
        items.push(BundleItem::EmptyDir(log_dir));
        if root.join("custom_connectors").is_dir() {
            items.push(BundleItem::Tree(PathBuf::from("custom_connectors")));
        }
        for doc in BUNDLE_DOCS {
            if root.join(doc).is_file() {
                items.push(BundleItem::Tree(PathBuf::from(doc)));
            }
        }

        let output = output.unwrap_or_else(|| {
            let parent = root.parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
            let format = ArchiveFormat::for_platform(platform);
            parent.join(bundle_file_name(camunda_version, platform, format))
        });

        Self {
            root,
            prefix,
            items,
            output,
        }
    }

    /// Adds `source` to the bundle as `<prefix>/<name>`.
    pub fn with_file(mut self, source: impl Into<PathBuf>, name: impl Into<PathBuf>) -> Self {
        self.items.push(BundleItem::File {
            source: source.into(),
            name: name.into(),
        });
        self
    }
}

#[cfg(unix)]
fn entry_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn entry_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() { 0o755 } else { 0o644 }
}

/// Lazily walks one manifest path, yielding directories before their contents in name order.
fn walk_manifest_path<'a>(
    root: &'a Path,
    prefix: &'a str,
    relative: &'a Path,
) -> impl Iterator<Item = Result<ArchiveEntry<'static>, ArchiveError>> + 'a {
    WalkDir::new(root.join(relative))
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => return Some(Err(ArchiveError::Io(err.into()))),
            };
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                debug!("Skipping symlink {}", entry.path().display());
                return None;
            }

            let name = match entry.path().strip_prefix(root) {
                Ok(relative) => Path::new(prefix).join(relative),
                Err(_) => return None,
            };
            Some(to_entry(entry.path(), name, file_type.is_dir()))
        })
}

/// Entries for one manifest item.
fn item_entries<'a>(
    root: &'a Path,
    prefix: &'a str,
    item: &'a BundleItem,
) -> Box<dyn Iterator<Item = Result<ArchiveEntry<'static>, ArchiveError>> + 'a> {
    match item {
        BundleItem::Tree(relative) => Box::new(walk_manifest_path(root, prefix, relative)),
        BundleItem::EmptyDir(relative) => Box::new(std::iter::once(Ok(ArchiveEntry::directory(
            Path::new(prefix).join(relative),
            0o755,
        )))),
        BundleItem::File { source, name } => Box::new(std::iter::once(to_entry(
            source,
            Path::new(prefix).join(name),
            false,
        ))),
    }
}

fn to_entry(path: &Path, name: PathBuf, is_dir: bool) -> Result<ArchiveEntry<'static>, ArchiveError> {
    let metadata = fs::symlink_metadata(path)?;
    let mode = entry_mode(&metadata);
    if is_dir {
        return Ok(ArchiveEntry::directory(name, mode));
    }
    let file = File::open(path)?;
    Ok(ArchiveEntry::file(name, mode, metadata.len(), file))
}

/// Writes `bundle` to its output path and returns that path.
///
/// The archive is assembled in a temporary file beside the output and moved into place only if
/// the output still does not exist, so an existing bundle is never replaced.
pub fn package(bundle: &RuntimeBundle, format: ArchiveFormat) -> Result<PathBuf, StackError> {
    if bundle.output.exists() {
        return Err(StackError::BundleExists(bundle.output.clone()));
    }
    for source in bundle.items.iter().filter_map(|item| item.source(&bundle.root)) {
        if !source.exists() {
            return Err(StackError::MissingBundlePath(source));
        }
    }

    let parent = bundle
        .output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    info!(
        "Packaging {} item(s) from {} into {}",
        bundle.items.len(),
        bundle.root.display(),
        bundle.output.display()
    );

    let top = std::iter::once(Ok(ArchiveEntry::directory(bundle.prefix.as_str(), 0o755)));
    let entries = top.chain(
        bundle
            .items
            .iter()
            .flat_map(|item| item_entries(&bundle.root, &bundle.prefix, item)),
    );

    let temp = tempfile::Builder::new()
        .prefix(".bundle-")
        .suffix(".part")
        .tempfile_in(parent)?;
    let mut writer = archive::write_archive(entries, BufWriter::new(temp), format)?;
    writer.flush()?;
    let temp = writer.into_inner().map_err(|err| err.into_error())?;

    temp.persist_noclobber(&bundle.output).map_err(|err| {
        if bundle.output.exists() {
            StackError::BundleExists(bundle.output.clone())
        } else {
            StackError::Io(err.error)
        }
    })?;

    info!("Created {}", bundle.output.display());
    Ok(bundle.output.clone())
}
