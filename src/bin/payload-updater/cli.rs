//! Command-line interface definition.

use clap::{CommandFactory, Parser, ValueEnum};
use payload_updater::config::{ActivationKind, UpdaterConfig, DEFAULT_CONFIG_PATH};
use payload_updater::Credential;
use std::path::PathBuf;

/// Keeps an encrypted payload script up to date and runs it on a schedule.
#[derive(Parser, Debug)]
#[command(name = "payload-updater")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Base URL serving version.json and script.js.enc.
    #[arg(long, env = "PAYLOAD_UPDATER_BASE_URL")]
    pub base_url: Option<String>,

    /// Explicit URL of the version document.
    #[arg(long, env = "PAYLOAD_UPDATER_VERSION_URL")]
    pub version_url: Option<String>,

    /// Explicit URL of the encrypted payload.
    #[arg(long, env = "PAYLOAD_UPDATER_PAYLOAD_URL")]
    pub payload_url: Option<String>,

    /// Key used to decrypt the payload.
    #[arg(long, env = "PAYLOAD_UPDATER_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Version assumed installed when no state file exists.
    #[arg(long, env = "PAYLOAD_UPDATER_INITIAL_VERSION")]
    pub initial_version: Option<String>,

    /// Root directory holding per-version installations.
    #[arg(long, env = "PAYLOAD_UPDATER_INSTALL_ROOT")]
    pub install_root: Option<PathBuf>,

    /// Seconds between the end of one cycle and the start of the next.
    #[arg(long, env = "PAYLOAD_UPDATER_POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Program used to run the decrypted payload.
    #[arg(long, env = "PAYLOAD_UPDATER_INTERPRETER")]
    pub interpreter: Option<String>,

    /// How a new version is activated outside this process.
    #[arg(long, value_enum, env = "PAYLOAD_UPDATER_ACTIVATION")]
    pub activation: Option<CliActivation>,

    /// Service unit rewritten by unit-file activation.
    #[arg(long, env = "PAYLOAD_UPDATER_UNIT_PATH")]
    pub unit_path: Option<PathBuf>,

    /// Keep at most this many version directories.
    #[arg(long, env = "PAYLOAD_UPDATER_RETAIN")]
    pub retain: Option<usize>,

    /// Log level (`RUST_LOG` still takes precedence).
    #[arg(long, env = "PAYLOAD_UPDATER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Path to configuration file (defaults to /etc/payload-updater/config.toml
    /// when it exists).
    #[arg(long, short, env = "PAYLOAD_UPDATER_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Activation strategy CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliActivation {
    /// Only record the version.
    None,
    /// Maintain a `current` symlink.
    Symlink,
    /// Rewrite a service unit's ExecStart line.
    UnitFile,
}

impl Cli {
    /// Convert CLI arguments into an `UpdaterConfig`.
    ///
    /// Arguments and environment variables override the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<UpdaterConfig> {
        let path = self.config.clone().or_else(|| {
            let system = PathBuf::from(DEFAULT_CONFIG_PATH);
            system.is_file().then_some(system)
        });

        // Start with default config or load from file
        let mut config = if let Some(ref path) = path {
            UpdaterConfig::from_file(path)?
        } else {
            UpdaterConfig::default()
        };

        if self.base_url.is_some() {
            config.base_url = self.base_url;
        }
        if self.version_url.is_some() {
            config.version_url = self.version_url;
        }
        if self.payload_url.is_some() {
            config.payload_url = self.payload_url;
        }
        if let Some(key) = self.key {
            config.decryption_key = Credential::new(key);
        }
        if self.initial_version.is_some() {
            config.initial_version = self.initial_version;
        }
        if let Some(install_root) = self.install_root {
            config.install_root = install_root;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }
        if let Some(interpreter) = self.interpreter {
            config.runner.interpreter = interpreter;
        }
        if let Some(kind) = self.activation {
            config.activation.kind = kind.into();
        }
        if self.unit_path.is_some() {
            config.activation.unit_path = self.unit_path;
        }
        if self.retain.is_some() {
            config.retain_versions = self.retain;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        Ok(config)
    }

    /// Print usage with `message` and exit with a non-zero status.
    pub fn usage_error(message: impl std::fmt::Display) -> ! {
        Self::command()
            .error(clap::error::ErrorKind::MissingRequiredArgument, message)
            .exit()
    }
}

impl From<CliActivation> for ActivationKind {
    fn from(a: CliActivation) -> Self {
        match a {
            CliActivation::None => Self::None,
            CliActivation::Symlink => Self::Symlink,
            CliActivation::UnitFile => Self::UnitFile,
        }
    }
}
