mod common;

use std::{fs, path::Path};

use assert_cmd::Command;
use common::archive_bytes;
use predicates::prelude::*;
use stackrun::archive::{self, ArchiveFormat};
use tempfile::tempdir;

fn stackrun() -> Command {
    Command::cargo_bin("stackrun").unwrap()
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = dir.join("stackrun.yaml");
    fs::write(
        &config,
        "camunda_version: \"8.5.0\"\nelasticsearch_version: \"8.13.4\"\ninstall_dir: \"c8run\"\nopen_browser: false\n",
    )
    .unwrap();
    config
}

/// Cached archives and extracted trees as left behind by an earlier `start`.
fn seed_install(install: &Path) {
    fs::create_dir_all(install.join("log")).unwrap();
    fs::write(
        install.join("elasticsearch-8.13.4.tar.gz"),
        archive_bytes(
            ArchiveFormat::TarGz,
            &[
                ("elasticsearch-8.13.4", 0o755, None),
                ("elasticsearch-8.13.4/bin", 0o755, None),
                ("elasticsearch-8.13.4/bin/elasticsearch", 0o755, Some("#!/bin/sh\n")),
            ],
        ),
    )
    .unwrap();
    fs::write(
        install.join("camunda-zeebe-8.5.0.tar.gz"),
        archive_bytes(
            ArchiveFormat::TarGz,
            &[
                ("camunda-zeebe-8.5.0", 0o755, None),
                ("camunda-zeebe-8.5.0/bin", 0o755, None),
                ("camunda-zeebe-8.5.0/bin/camunda", 0o755, Some("#!/bin/sh\n")),
            ],
        ),
    )
    .unwrap();
    fs::write(
        install.join("connector-runtime-bundle-8.5.0-with-dependencies.jar"),
        "PK",
    )
    .unwrap();
    fs::write(install.join("connectors-application.properties"), "server.port=8085\n").unwrap();

    fs::create_dir_all(install.join("elasticsearch-8.13.4/data")).unwrap();
    fs::create_dir_all(install.join("camunda-zeebe-8.5.0/data")).unwrap();
    for log in ["elasticsearch.log", "camunda.log", "connectors.log"] {
        fs::write(install.join("log").join(log), "old output\n").unwrap();
    }
}

#[test]
fn help_lists_commands() {
    stackrun()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("stop"))
        .stdout(predicate::str::contains("package"))
        .stdout(predicate::str::contains("clean"));
}

#[test]
fn clean_removes_extractions_and_logs_but_keeps_archives() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let install = dir.path().join("c8run");
    seed_install(&install);

    stackrun()
        .current_dir(dir.path())
        .args(["clean", "--config", config.to_str().unwrap()])
        .assert()
        .success();

    assert!(!install.join("elasticsearch-8.13.4").exists());
    assert!(!install.join("camunda-zeebe-8.5.0").exists());
    assert!(!install.join("log/camunda.log").exists());
    assert!(install.join("elasticsearch-8.13.4.tar.gz").exists());
    assert!(install.join("camunda-zeebe-8.5.0.tar.gz").exists());
    assert!(install.join("connector-runtime-bundle-8.5.0-with-dependencies.jar").exists());
}

#[test]
fn stop_without_detached_services_is_a_no_op() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    stackrun()
        .current_dir(dir.path())
        .args(["stop", "-c", config.to_str().unwrap()])
        .assert()
        .success();
}

#[test]
fn missing_environment_variable_fails() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("stackrun.yaml");
    fs::write(&config, "install_dir: \"${STACKRUN_CLI_SURELY_UNSET}/c8\"\n").unwrap();

    stackrun()
        .current_dir(dir.path())
        .env_remove("STACKRUN_CLI_SURELY_UNSET")
        .args(["clean", "-c", config.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("STACKRUN_CLI_SURELY_UNSET"));
}

#[cfg(unix)]
#[test]
fn package_bundles_cached_distributions() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let install = dir.path().join("c8run");
    seed_install(&install);
    let output = dir.path().join("dist/camunda8-run.tar.gz");

    stackrun()
        .current_dir(dir.path())
        .args([
            "package",
            "-c",
            config.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("camunda8-run.tar.gz"));

    assert!(!install.join("elasticsearch-8.13.4/data").exists());
    let unpacked = dir.path().join("unpacked");
    archive::extract_file(&output, ArchiveFormat::TarGz, &unpacked).unwrap();
    assert!(unpacked.join("c8run/elasticsearch-8.13.4/bin/elasticsearch").is_file());
    assert!(unpacked.join("c8run/camunda-zeebe-8.5.0/bin/camunda").is_file());
    assert!(unpacked.join("c8run/connectors-application.properties").is_file());
    assert!(unpacked.join("c8run/log").is_dir());
    assert_eq!(fs::read_dir(unpacked.join("c8run/log")).unwrap().count(), 0);
    assert!(unpacked.join("c8run/stackrun.yaml").is_file());
    assert!(unpacked.join("c8run/stackrun").is_file());

    stackrun()
        .current_dir(dir.path())
        .args([
            "package",
            "-c",
            config.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("BundleExists"));
}
