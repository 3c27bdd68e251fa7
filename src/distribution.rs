//! Catalog of the third-party distributions that make up the stack.
use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::archive::ArchiveFormat;

const ELASTICSEARCH_BASE_URL: &str = "https://artifacts.elastic.co/downloads/elasticsearch";
const CAMUNDA_RELEASES_URL: &str = "https://github.com/camunda/camunda/releases/download";
const CONNECTORS_MAVEN_URL: &str =
    "https://repo1.maven.org/maven2/io/camunda/connector/connector-runtime-bundle";

/// Operating system and CPU architecture a distribution is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPlatform {
    /// `linux`, `darwin` or `windows`.
    pub os: String,
    /// `x86_64` or `aarch64`.
    pub arch: String,
}

impl TargetPlatform {
    /// Builds a platform from raw names, normalizing Rust's `macos` to `darwin` and `arm64` to `aarch64`.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        let os = match os.into().as_str() {
            "macos" => "darwin".to_string(),
            other => other.to_string(),
        };
        let arch = match arch.into().as_str() {
            "arm64" => "aarch64".to_string(),
            "amd64" => "x86_64".to_string(),
            other => other.to_string(),
        };
        Self { os, arch }
    }

    /// Platform of the running binary.
    pub fn host() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Whether archives for this platform use the Windows layout.
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// A versioned third-party distribution and where it lives locally.
///
/// Resolved once and never mutated. The extracted directory is the durable result; the archive is
/// a cache that may be deleted at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionArtifact {
    /// Short name used in logs.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Platform the distribution targets.
    pub platform: TargetPlatform,
    /// Archive format, or `None` for single-file artifacts used as downloaded.
    pub format: Option<ArchiveFormat>,
    /// Remote location.
    pub source_url: String,
    /// Local archive (or file) path.
    pub archive_path: PathBuf,
    /// Local extraction directory; equals `archive_path` for single-file artifacts.
    pub extracted_path: PathBuf,
}

/// Elasticsearch distribution for `platform`.
pub fn search_engine(version: &str, platform: &TargetPlatform, install_dir: &Path) -> DistributionArtifact {
    let format = ArchiveFormat::for_platform(platform);
    // Elastic only publishes x86_64 builds for Windows.
    let arch = if platform.is_windows() { "x86_64" } else { platform.arch.as_str() };
    let file_name = format!("elasticsearch-{version}.{}", format.extension());

    DistributionArtifact {
        name: "elasticsearch".to_string(),
        version: version.to_string(),
        platform: platform.clone(),
        format: Some(format),
        source_url: format!(
            "{ELASTICSEARCH_BASE_URL}/elasticsearch-{version}-{}-{arch}.{}",
            platform.os,
            format.extension()
        ),
        archive_path: install_dir.join(file_name),
        extracted_path: install_dir.join(format!("elasticsearch-{version}")),
    }
}

/// Camunda (Zeebe) distribution for `platform`.
pub fn workflow_engine(version: &str, platform: &TargetPlatform, install_dir: &Path) -> DistributionArtifact {
    let format = ArchiveFormat::for_platform(platform);
    let file_name = format!("camunda-zeebe-{version}.{}", format.extension());

    DistributionArtifact {
        name: "camunda".to_string(),
        version: version.to_string(),
        platform: platform.clone(),
        format: Some(format),
        source_url: format!("{CAMUNDA_RELEASES_URL}/{version}/{file_name}"),
        archive_path: install_dir.join(&file_name),
        extracted_path: install_dir.join(format!("camunda-zeebe-{version}")),
    }
}

/// Connector runtime bundle. A platform-independent jar used in place.
pub fn connector_runtime(version: &str, platform: &TargetPlatform, install_dir: &Path) -> DistributionArtifact {
    let file_name = format!("connector-runtime-bundle-{version}-with-dependencies.jar");
    let path = install_dir.join(&file_name);

    DistributionArtifact {
        name: "connectors".to_string(),
        version: version.to_string(),
        platform: platform.clone(),
        format: None,
        source_url: format!("{CONNECTORS_MAVEN_URL}/{version}/{file_name}"),
        archive_path: path.clone(),
        extracted_path: path,
    }
}
