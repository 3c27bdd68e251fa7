mod common;

use std::fs;

use common::{CannedFetcher, archive_bytes, stack_fetcher, stack_settings};
use stackrun::{
    archive::ArchiveFormat,
    distribution::{self, TargetPlatform},
    provision::{self, Provisioner},
};
use tempfile::tempdir;

#[test]
fn provisions_every_distribution_once() {
    let dir = tempdir().unwrap();
    let settings = stack_settings(dir.path(), false);
    let platform = TargetPlatform::new("linux", "x86_64");
    let fetcher = stack_fetcher();

    for _ in 0..2 {
        for artifact in settings.artifacts(&platform) {
            let installed = provision::ensure(&artifact, &fetcher).unwrap();
            assert!(installed.exists(), "{}", installed.display());
        }
    }

    assert_eq!(fetcher.request_count(), 3);
    let install = &settings.layout.install_dir;
    assert!(install.join("elasticsearch-8.13.4/bin/elasticsearch").is_file());
    assert!(install.join("camunda-zeebe-8.5.0/lib/zeebe.jar").is_file());
    assert_eq!(
        fs::read(install.join("connector-runtime-bundle-8.5.0-with-dependencies.jar")).unwrap(),
        b"PK connectors"
    );
    assert!(install.join("elasticsearch-8.13.4.tar.gz").is_file());
}

#[test]
fn windows_artifacts_are_zip_archives() {
    let dir = tempdir().unwrap();
    let platform = TargetPlatform::new("windows", "x86_64");
    let artifact = distribution::workflow_engine("8.5.0", &platform, dir.path());
    assert_eq!(artifact.format, Some(ArchiveFormat::Zip));

    let body = archive_bytes(
        ArchiveFormat::Zip,
        &[
            ("camunda-zeebe-8.5.0", 0o755, None),
            ("camunda-zeebe-8.5.0/bin", 0o755, None),
            ("camunda-zeebe-8.5.0/bin/camunda.bat", 0o644, Some("@echo off\r\n")),
        ],
    );
    let fetcher = CannedFetcher::default().with("camunda-zeebe", body);

    let installed = Provisioner::new(Box::new(fetcher)).ensure(&artifact).unwrap();

    assert_eq!(installed, dir.path().join("camunda-zeebe-8.5.0"));
    assert!(installed.join("bin/camunda.bat").is_file());
}

#[test]
fn failed_download_is_reported_and_leaves_no_files() {
    let dir = tempdir().unwrap();
    let platform = TargetPlatform::new("linux", "x86_64");
    let artifact = distribution::search_engine("8.13.4", &platform, dir.path());
    let fetcher = CannedFetcher::default();

    let err = provision::ensure(&artifact, &fetcher).unwrap_err();

    assert!(err.to_string().contains("404"), "{err}");
    assert!(!artifact.archive_path.exists());
    assert!(!artifact.extracted_path.exists());
    let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn malicious_archive_is_an_integrity_error() {
    let dir = tempdir().unwrap();
    let platform = TargetPlatform::new("linux", "x86_64");
    let artifact = distribution::search_engine("8.13.4", &platform, dir.path());
    let body = archive_bytes(
        ArchiveFormat::TarGz,
        &[("../outside.txt", 0o644, Some("nope"))],
    );
    let fetcher = CannedFetcher::default().with("elasticsearch", body);

    let err = provision::ensure(&artifact, &fetcher).unwrap_err();

    assert!(err.is_integrity_error(), "{err}");
    assert!(!artifact.extracted_path.exists());
    assert!(!dir.path().join("outside.txt").exists());
}

#[test]
fn clean_then_provision_reuses_cached_archives() {
    let dir = tempdir().unwrap();
    let settings = stack_settings(dir.path(), false);
    let platform = TargetPlatform::new("linux", "x86_64");
    let fetcher = stack_fetcher();
    let artifacts = settings.artifacts(&platform);

    for artifact in &artifacts {
        provision::ensure(artifact, &fetcher).unwrap();
    }
    for artifact in &artifacts {
        provision::remove_extracted(artifact).unwrap();
    }
    assert!(!settings.layout.install_dir.join("camunda-zeebe-8.5.0").exists());

    for artifact in &artifacts {
        provision::ensure(artifact, &fetcher).unwrap();
    }

    assert_eq!(fetcher.request_count(), 3);
    assert!(settings.layout.install_dir.join("camunda-zeebe-8.5.0/bin/camunda").is_file());
}
