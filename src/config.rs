//! Configuration for payload-updater.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Version assumed when nothing has been installed yet.
pub const NO_VERSION: &str = "0.0.0";

/// System-wide configuration file installed with the package.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/payload-updater/config.toml";

/// Name of the remote version document under the base URL.
pub const VERSION_DOCUMENT: &str = "version.json";

/// Name of the remote encrypted payload under the base URL.
pub const PAYLOAD_DOCUMENT: &str = "script.js.enc";

/// Opaque decryption credential.
///
/// Never printed: `Debug` output is redacted so configs can be logged.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw credential string.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw credential bytes, used as key material.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Whether no credential was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// How a newly installed version is made active outside this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivationKind {
    /// Only record the version; nothing else changes.
    #[default]
    None,
    /// Point `<install_root>/current` at the new version directory.
    Symlink,
    /// Rewrite `ExecStart=` in a service unit file.
    UnitFile,
}

/// Updater configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Base URL serving `version.json` and `script.js.enc`.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Explicit version document URL (overrides the base URL convention).
    #[serde(default)]
    pub version_url: Option<String>,

    /// Explicit payload URL (overrides the base URL convention).
    #[serde(default)]
    pub payload_url: Option<String>,

    /// Key used to decrypt payloads.
    #[serde(default)]
    pub decryption_key: Credential,

    /// Version assumed installed when no state file exists.
    #[serde(default)]
    pub initial_version: Option<String>,

    /// Root directory holding per-version installations.
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// File name of the persisted version state, relative to `install_root`.
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Delay between the end of one cycle and the start of the next.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Upper bound for any single remote request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Keep at most this many version directories (unset keeps all).
    #[serde(default)]
    pub retain_versions: Option<usize>,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Payload runner configuration.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Activation configuration.
    #[serde(default)]
    pub activation: ActivationConfig,
}

/// Payload runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Program used to run the decrypted payload.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Extra arguments placed before the payload path.
    #[serde(default)]
    pub args: Vec<String>,

    /// Kill the payload after this many seconds (unset waits forever).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Activation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Strategy to use.
    #[serde(default)]
    pub kind: ActivationKind,

    /// Unit file rewritten by the `unit-file` strategy.
    #[serde(default)]
    pub unit_path: Option<PathBuf>,

    /// `ExecStart=` template; `{version}`, `{version_dir}` and `{script}` are substituted.
    #[serde(default)]
    pub exec_start: Option<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            version_url: None,
            payload_url: None,
            decryption_key: Credential::default(),
            initial_version: None,
            install_root: default_install_root(),
            state_file: default_state_file(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
            retain_versions: None,
            runner: RunnerConfig::default(),
            activation: ActivationConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: Vec::new(),
            timeout_secs: None,
        }
    }
}

fn default_install_root() -> PathBuf {
    directories::ProjectDirs::from("", "", "payload-updater")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".payload-updater"))
}

fn default_state_file() -> String {
    "versionInfo.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interpreter() -> String {
    "node".to_string()
}

const fn default_poll_interval() -> u64 {
    600 // 10 minutes
}

const fn default_request_timeout() -> u64 {
    30
}

/// Resolved remote locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoints {
    /// URL of the version document.
    pub version_url: String,
    /// URL of the encrypted payload.
    pub payload_url: String,
}

impl RemoteEndpoints {
    /// Derive both URLs from a base URL by convention.
    #[must_use]
    pub fn from_base(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            version_url: format!("{base}/{VERSION_DOCUMENT}"),
            payload_url: format!("{base}/{PAYLOAD_DOCUMENT}"),
        }
    }
}

impl UpdaterConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve the remote URLs.
    ///
    /// Explicit `version_url`/`payload_url` win over the base URL convention.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] when a URL can be derived from neither.
    pub fn endpoints(&self) -> crate::Result<RemoteEndpoints> {
        let derived = self.base_url.as_deref().map(RemoteEndpoints::from_base);

        let version_url = self
            .version_url
            .clone()
            .or_else(|| derived.as_ref().map(|d| d.version_url.clone()))
            .ok_or_else(|| crate::Error::Config("missing base URL or version URL".into()))?;
        let payload_url = self
            .payload_url
            .clone()
            .or_else(|| derived.map(|d| d.payload_url))
            .ok_or_else(|| crate::Error::Config("missing base URL or payload URL".into()))?;

        Ok(RemoteEndpoints {
            version_url,
            payload_url,
        })
    }

    /// Check that everything required to start is present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] naming the first missing setting.
    pub fn validate(&self) -> crate::Result<()> {
        self.endpoints()?;
        if self.decryption_key.is_empty() {
            return Err(crate::Error::Config("missing decryption key".into()));
        }
        if self.activation.kind == ActivationKind::UnitFile && self.activation.unit_path.is_none()
        {
            return Err(crate::Error::Config(
                "unit-file activation requires unit_path".into(),
            ));
        }
        if self.retain_versions == Some(0) {
            return Err(crate::Error::Config(
                "retain_versions must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Version assumed when no state file exists.
    #[must_use]
    pub fn baseline_version(&self) -> &str {
        self.initial_version.as_deref().unwrap_or(NO_VERSION)
    }

    /// Absolute path of the version state file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.install_root.join(&self.state_file)
    }

    /// Interval between cycles.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
