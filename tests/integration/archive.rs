mod common;

use std::{
    fs,
    io::{Cursor, Write},
};

use common::archive_bytes;
use stackrun::{
    archive::{self, ArchiveFormat},
    error::ArchiveError,
};
use flate2::{Compression, write::GzEncoder};
use tempfile::tempdir;

fn sample(format: ArchiveFormat) -> Vec<u8> {
    archive_bytes(
        format,
        &[
            ("dist", 0o755, None),
            ("dist/bin", 0o755, None),
            ("dist/bin/run.sh", 0o755, Some("#!/bin/sh\necho run\n")),
            ("dist/config", 0o700, None),
            ("dist/config/app.yaml", 0o600, Some("port: 8080\n")),
        ],
    )
}

#[test]
fn tar_gz_and_zip_extract_to_the_same_tree() {
    let dir = tempdir().unwrap();
    for format in [ArchiveFormat::TarGz, ArchiveFormat::Zip] {
        let dest = dir.path().join(format.extension());
        archive::extract_to(Cursor::new(sample(format)), format, &dest).unwrap();

        assert_eq!(
            fs::read_to_string(dest.join("dist/bin/run.sh")).unwrap(),
            "#!/bin/sh\necho run\n"
        );
        assert_eq!(
            fs::read_to_string(dest.join("dist/config/app.yaml")).unwrap(),
            "port: 8080\n"
        );
    }
}

#[cfg(unix)]
#[test]
fn extraction_restores_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    for format in [ArchiveFormat::TarGz, ArchiveFormat::Zip] {
        let dest = dir.path().join(format.extension());
        archive::extract_to(Cursor::new(sample(format)), format, &dest).unwrap();

        let mode = |path: &str| fs::metadata(dest.join(path)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("dist/bin/run.sh"), 0o755, "{format:?}");
        assert_eq!(mode("dist/config"), 0o700, "{format:?}");
        assert_eq!(mode("dist/config/app.yaml"), 0o600, "{format:?}");
    }
}

#[test]
fn existing_destination_is_left_untouched() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("keep.txt"), "mine").unwrap();

    archive::extract_to(Cursor::new(sample(ArchiveFormat::TarGz)), ArchiveFormat::TarGz, &dest)
        .unwrap();

    assert!(!dest.join("dist").exists());
    assert_eq!(fs::read_to_string(dest.join("keep.txt")).unwrap(), "mine");
}

#[test]
fn escaping_entry_aborts_and_cleans_up() {
    let dir = tempdir().unwrap();
    for format in [ArchiveFormat::TarGz, ArchiveFormat::Zip] {
        let bytes = archive_bytes(
            format,
            &[
                ("dist", 0o755, None),
                ("dist/ok.txt", 0o644, Some("ok")),
                ("dist/../../escaped.txt", 0o644, Some("bad")),
            ],
        );
        let dest = dir.path().join("nested").join(format.extension());

        let err = archive::extract_to(Cursor::new(bytes), format, &dest).unwrap_err();

        assert!(matches!(err, ArchiveError::PathTraversal { .. }), "{format:?}: {err}");
        assert!(!dest.exists(), "{format:?}");
        assert!(!dir.path().join("escaped.txt").exists());
        assert!(!dir.path().join("nested/escaped.txt").exists());
    }
}

#[test]
fn truncated_tar_gz_is_corrupt() {
    let dir = tempdir().unwrap();
    let mut bytes = sample(ArchiveFormat::TarGz);
    bytes.truncate(bytes.len() / 2);
    let dest = dir.path().join("out");

    let err = archive::extract_to(Cursor::new(bytes), ArchiveFormat::TarGz, &dest).unwrap_err();

    assert!(matches!(err, ArchiveError::CorruptArchive(_)), "{err}");
    assert!(!dest.exists());
}

#[test]
fn tar_entry_shorter_than_its_header_is_a_size_mismatch() {
    // A gzip stream that ends cleanly one byte into where the entry's content should continue.
    let mut header = tar::Header::new_gnu();
    header.set_path("dist/short.txt").unwrap();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(10);
    header.set_cksum();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(header.as_bytes()).unwrap();
    encoder.write_all(b"123456789").unwrap();
    let bytes = encoder.finish().unwrap();

    let dir = tempdir().unwrap();
    let dest = dir.path().join("out");
    let err = archive::extract_to(Cursor::new(bytes), ArchiveFormat::TarGz, &dest).unwrap_err();

    assert!(
        matches!(
            err,
            ArchiveError::SizeMismatch {
                expected: 10,
                actual: 9,
                ..
            }
        ),
        "{err}"
    );
    assert!(!dest.exists());
}

#[test]
fn garbage_zip_is_corrupt() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("out");

    let err = archive::extract_to(Cursor::new(b"not a zip".to_vec()), ArchiveFormat::Zip, &dest)
        .unwrap_err();

    assert!(matches!(err, ArchiveError::CorruptArchive(_)));
    assert!(!dest.exists());
}
