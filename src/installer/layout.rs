//! On-disk layout of per-version installations.

use std::path::{Path, PathBuf};

/// Downloaded copy of the remote version document.
pub const DESCRIPTOR_FILE: &str = "version.json";
/// Encrypted payload as fetched.
pub const PAYLOAD_FILE: &str = "script.js.enc";
/// Decrypted payload that gets executed.
pub const SCRIPT_FILE: &str = "script.js";
/// Completion marker.
pub const MANIFEST_FILE: &str = "manifest.json";

const PART_SUFFIX: &str = ".part";

/// Paths under the installation root.
///
/// ```text
/// <root>/<version>/version.json
/// <root>/<version>/script.js.enc
/// <root>/<version>/script.js
/// <root>/<version>/manifest.json
/// ```
#[derive(Debug, Clone)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Installation root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `version`.
    #[must_use]
    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join(version)
    }

    /// Downloaded descriptor for `version`.
    #[must_use]
    pub fn descriptor_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(DESCRIPTOR_FILE)
    }

    /// Encrypted payload for `version`.
    #[must_use]
    pub fn payload_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(PAYLOAD_FILE)
    }

    /// Decrypted payload for `version`.
    #[must_use]
    pub fn script_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(SCRIPT_FILE)
    }

    /// Completion manifest for `version`.
    #[must_use]
    pub fn manifest_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(MANIFEST_FILE)
    }
}

/// Staging path next to `path`; renamed over `path` once complete.
#[must_use]
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(PART_SUFFIX);
    path.with_file_name(name)
}

/// A version whose artifacts are fully present on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInstallation {
    /// Installed version.
    pub version: String,
    /// Version directory.
    pub dir: PathBuf,
    /// Decrypted payload to execute.
    pub script: PathBuf,
    /// SHA-256 of the decrypted payload, hex encoded.
    pub sha256: String,
}
