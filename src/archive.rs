//! Reading, writing and extracting tar+gzip and zip archives.
//!
//! Entries flow through the codec as [`ArchiveEntry`] values: writers consume them lazily in
//! sequence order, readers hand them to a visitor one at a time. Extraction is idempotent on the
//! destination directory and refuses any entry that would land outside of it.
use std::{
    borrow::Cow,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, Write},
    path::{Component, Path, PathBuf},
};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use tracing::{debug, info, warn};
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::{distribution::TargetPlatform, error::ArchiveError};

/// Default mode for directories whose recorded mode is unusable.
const DEFAULT_DIR_MODE: u32 = 0o755;

/// Supported on-disk archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Tar stream compressed with gzip (`.tar.gz`).
    TarGz,
    /// Zip archive (`.zip`).
    Zip,
}

impl ArchiveFormat {
    /// Zip for Windows-style packaging, tar+gzip everywhere else.
    pub fn for_platform(platform: &TargetPlatform) -> Self {
        if platform.is_windows() {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::TarGz
        }
    }

    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Zip => "zip",
        }
    }
}

/// Kind of record stored in an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file with content.
    File,
    /// Directory; carries no content.
    Directory,
}

/// One archive record.
pub struct ArchiveEntry<'a> {
    /// Path relative to the archive root.
    pub path: PathBuf,
    /// File or directory.
    pub kind: EntryKind,
    /// Permission bits (`0o7777` mask).
    pub mode: u32,
    /// Uncompressed size in bytes. Always zero for directories.
    pub size: u64,
    /// Content stream, valid for the lifetime of the underlying archive stream.
    pub content: Box<dyn Read + 'a>,
}

impl<'a> ArchiveEntry<'a> {
    /// Creates a file entry.
    pub fn file(
        path: impl Into<PathBuf>,
        mode: u32,
        size: u64,
        content: impl Read + 'a,
    ) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            mode: mode & 0o7777,
            size,
            content: Box::new(content),
        }
    }

    /// Creates a directory entry.
    pub fn directory(path: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            mode: mode & 0o7777,
            size: 0,
            content: Box::new(io::empty()),
        }
    }

    /// Archive name using `/` separators, with a trailing `/` for directories.
    fn archive_name(&self) -> String {
        let mut name = self
            .path
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        if self.kind == EntryKind::Directory && !name.ends_with('/') {
            name.push('/');
        }
        name
    }
}

impl std::fmt::Debug for ArchiveEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("mode", &format_args!("{:o}", self.mode))
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Reader adapter that counts the bytes passing through it.
struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.count += read as u64;
        Ok(read)
    }
}

/// Copies at most `declared + 1` bytes so overlong streams are detected without draining them.
fn copy_declared(
    path: &Path,
    declared: u64,
    content: &mut dyn Read,
    sink: &mut dyn Write,
) -> Result<(), ArchiveError> {
    let mut limited = content.take(declared.saturating_add(1));
    let mut buffer = [0u8; 64 * 1024];
    let mut copied = 0u64;
    loop {
        let read = match limited.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            // Failures on the read side mean the stream itself is damaged.
            Err(err) => return Err(ArchiveError::CorruptArchive(format!("{}: {err}", path.display()))),
        };
        sink.write_all(&buffer[..read])?;
        copied += read as u64;
    }
    if copied != declared {
        return Err(ArchiveError::SizeMismatch {
            path: path.to_path_buf(),
            expected: declared,
            actual: copied,
        });
    }
    Ok(())
}

/// Writes `entries` to `output` in sequence order.
///
/// The compressor and archive writer are finished on success; on failure they are dropped, which
/// flushes whatever was already written. Returns the underlying writer.
pub fn write_archive<'a, I, W>(
    entries: I,
    output: W,
    format: ArchiveFormat,
) -> Result<W, ArchiveError>
where
    I: IntoIterator<Item = Result<ArchiveEntry<'a>, ArchiveError>>,
    W: Write + Seek,
{
    match format {
        ArchiveFormat::TarGz => write_tar_gz(entries, output),
        ArchiveFormat::Zip => write_zip(entries, output),
    }
}

fn write_tar_gz<'a, I, W>(entries: I, output: W) -> Result<W, ArchiveError>
where
    I: IntoIterator<Item = Result<ArchiveEntry<'a>, ArchiveError>>,
    W: Write,
{
    let encoder = GzEncoder::new(output, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for entry in entries {
        let entry = entry?;
        let name = entry.archive_name();
        let mut header = tar::Header::new_gnu();
        header.set_mode(entry.mode);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        match entry.kind {
            EntryKind::Directory => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                builder.append_data(&mut header, &name, io::empty())?;
            }
            EntryKind::File => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(entry.size);
                let mut counted = CountingReader {
                    inner: entry.content.take(entry.size.saturating_add(1)),
                    count: 0,
                };
                builder.append_data(&mut header, &name, &mut counted)?;
                if counted.count != entry.size {
                    return Err(ArchiveError::SizeMismatch {
                        path: entry.path,
                        expected: entry.size,
                        actual: counted.count,
                    });
                }
            }
        }
        debug!("a {name}");
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

fn write_zip<'a, I, W>(entries: I, output: W) -> Result<W, ArchiveError>
where
    I: IntoIterator<Item = Result<ArchiveEntry<'a>, ArchiveError>>,
    W: Write + Seek,
{
    let mut writer = ZipWriter::new(output);

    for entry in entries {
        let mut entry = entry?;
        let name = entry.archive_name();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(entry.mode)
            .large_file(entry.size >= u64::from(u32::MAX));

        match entry.kind {
            EntryKind::Directory => writer.add_directory(name.clone(), options)?,
            EntryKind::File => {
                writer.start_file(name.clone(), options)?;
                copy_declared(&entry.path, entry.size, &mut entry.content, &mut writer)?;
            }
        }
        debug!("a {name}");
    }

    Ok(writer.finish()?)
}

/// Feeds every file and directory entry of `input` to `visit`, in archive order.
///
/// The sequence is lazy and non-restartable: each entry's content must be consumed inside the
/// visitor. Entries of other kinds (links, devices) are skipped.
pub fn read_archive<R, F>(input: R, format: ArchiveFormat, visit: F) -> Result<(), ArchiveError>
where
    R: Read + Seek,
    F: FnMut(ArchiveEntry<'_>) -> Result<(), ArchiveError>,
{
    match format {
        ArchiveFormat::TarGz => read_tar_gz(input, visit),
        ArchiveFormat::Zip => read_zip(input, visit),
    }
}

fn corrupt(err: io::Error) -> ArchiveError {
    ArchiveError::CorruptArchive(err.to_string())
}

fn read_tar_gz<R, F>(input: R, mut visit: F) -> Result<(), ArchiveError>
where
    R: Read,
    F: FnMut(ArchiveEntry<'_>) -> Result<(), ArchiveError>,
{
    let mut archive = tar::Archive::new(GzDecoder::new(input));

    for entry in archive.entries().map_err(corrupt)? {
        let entry = entry.map_err(corrupt)?;
        let header = entry.header();
        let entry_type = header.entry_type();
        let kind = if entry_type.is_dir() {
            EntryKind::Directory
        } else if entry_type.is_file() {
            EntryKind::File
        } else {
            debug!("Skipping unsupported tar entry type {entry_type:?}");
            continue;
        };

        let mode = header.mode().map_err(corrupt)?;
        let size = header.size().map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();

        visit(ArchiveEntry {
            path,
            kind,
            mode: mode & 0o7777,
            size: if kind == EntryKind::Directory { 0 } else { size },
            content: Box::new(entry),
        })?;
    }

    Ok(())
}

fn read_zip<R, F>(input: R, mut visit: F) -> Result<(), ArchiveError>
where
    R: Read + Seek,
    F: FnMut(ArchiveEntry<'_>) -> Result<(), ArchiveError>,
{
    let mut archive = ZipArchive::new(input)?;

    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        let kind = if file.is_dir() {
            EntryKind::Directory
        } else if file.is_file() {
            EntryKind::File
        } else {
            debug!("Skipping unsupported zip entry '{}'", file.name());
            continue;
        };

        let default_mode = match kind {
            EntryKind::Directory => DEFAULT_DIR_MODE,
            EntryKind::File => 0o644,
        };
        let mode = file.unix_mode().unwrap_or(default_mode) & 0o7777;
        let size = if kind == EntryKind::Directory { 0 } else { file.size() };
        let path = PathBuf::from(file.name());

        visit(ArchiveEntry {
            path,
            kind,
            mode,
            size,
            content: Box::new(file),
        })?;
    }

    Ok(())
}

/// Lexically joins `entry` onto `destination`, rejecting absolute paths and escaping `..` segments.
pub fn resolve_entry_path(destination: &Path, entry: &Path) -> Result<PathBuf, ArchiveError> {
    let traversal = || ArchiveError::PathTraversal {
        path: entry.to_path_buf(),
        destination: destination.to_path_buf(),
    };

    // Archives written on Windows may use backslashes; treat them as separators everywhere.
    let raw = entry.to_string_lossy();
    let normalized: Cow<'_, str> = if raw.contains('\\') {
        Cow::Owned(raw.replace('\\', "/"))
    } else {
        raw
    };

    let mut relative = PathBuf::new();
    for component in Path::new(normalized.as_ref()).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(traversal());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }

    let resolved = destination.join(relative);
    if !resolved.starts_with(destination) {
        return Err(traversal());
    }
    Ok(resolved)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        debug!("Could not apply mode {mode:o} to {}: {err}", path.display());
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) {}

/// Extracts `input` into `destination`.
///
/// Does nothing when `destination` already exists. On failure the directory created by this call
/// is removed again, so no half-written tree is left behind.
pub fn extract_to<R>(input: R, format: ArchiveFormat, destination: &Path) -> Result<(), ArchiveError>
where
    R: Read + Seek,
{
    if destination.exists() {
        info!(
            "{} already exists, skipping extraction",
            destination.display()
        );
        return Ok(());
    }

    fs::create_dir_all(destination)?;
    let root = destination.canonicalize()?;

    match extract_entries(input, format, &root) {
        Ok(count) => {
            info!("Extracted {count} entries into {}", root.display());
            Ok(())
        }
        Err(err) => {
            if let Err(cleanup) = fs::remove_dir_all(&root) {
                warn!(
                    "Failed to remove partial extraction at {}: {cleanup}",
                    root.display()
                );
            }
            Err(err)
        }
    }
}

fn extract_entries<R>(input: R, format: ArchiveFormat, root: &Path) -> Result<usize, ArchiveError>
where
    R: Read + Seek,
{
    let mut directory_modes = Vec::new();
    let mut count = 0usize;

    read_archive(input, format, |mut entry| {
        let target = resolve_entry_path(root, &entry.path)?;

        match entry.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&target)?;
                directory_modes.push((target, entry.mode));
            }
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                write_entry_file(&target, &mut entry)?;
                debug!("x {}", target.display());
            }
        }
        count += 1;
        Ok(())
    })?;

    // Deepest directories first so restrictive parent modes cannot block their children.
    directory_modes.sort_by(|(a, _), (b, _)| b.components().count().cmp(&a.components().count()));
    for (path, mode) in directory_modes {
        let mode = if mode & 0o700 == 0 { DEFAULT_DIR_MODE } else { mode };
        apply_mode(&path, mode);
    }

    Ok(count)
}

/// Writes a file entry and verifies the byte count; a short or long file is removed again.
fn write_entry_file(target: &Path, entry: &mut ArchiveEntry<'_>) -> Result<(), ArchiveError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(target)?;

    let result = copy_declared(&entry.path, entry.size, &mut entry.content, &mut file)
        .and_then(|_| file.flush().map_err(ArchiveError::from));
    drop(file);

    match result {
        Ok(()) => {
            apply_mode(target, entry.mode);
            Ok(())
        }
        Err(err) => {
            let _ = fs::remove_file(target);
            Err(err)
        }
    }
}

/// Opens `archive` and extracts it into `destination` (see [`extract_to`]).
pub fn extract_file(archive: &Path, format: ArchiveFormat, destination: &Path) -> Result<(), ArchiveError> {
    if destination.exists() {
        return extract_to(io::Cursor::new(Vec::new()), format, destination);
    }
    let file = File::open(archive)?;
    extract_to(io::BufReader::new(file), format, destination)
}
