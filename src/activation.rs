//! Making a newly installed version active outside this process.
//!
//! The coordinator only records which version is current. Anything else that
//! must point at the new version (a service unit's command line, a stable
//! `current` symlink) is handled by an [`Activation`] strategy.

use crate::config::{ActivationConfig, ActivationKind};
use crate::error::{Error, Result};
use crate::installer::VersionInstallation;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the symlink maintained by [`SymlinkActivation`].
pub const CURRENT_LINK: &str = "current";

/// Default `ExecStart=` template for [`UnitFileActivation`].
///
/// Keeps reading [`crate::config::DEFAULT_CONFIG_PATH`] so the restarted
/// service still has its remote and key.
pub const DEFAULT_EXEC_START: &str =
    "/usr/bin/payload-updater --config /etc/payload-updater/config.toml --initial-version {version}";

/// Strategy run after the version pointer advances.
#[async_trait]
pub trait Activation: Send + Sync {
    /// Activate `installation`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Activation`] or [`Error::Io`] on failure; the new
    /// version stays recorded as current either way.
    async fn activate(&self, installation: &VersionInstallation) -> Result<()>;
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoActivation;

#[async_trait]
impl Activation for NoActivation {
    async fn activate(&self, _installation: &VersionInstallation) -> Result<()> {
        Ok(())
    }
}

/// Points `<root>/current` at the active version directory.
#[derive(Debug, Clone)]
pub struct SymlinkActivation {
    link: PathBuf,
}

impl SymlinkActivation {
    /// Maintain the `current` link inside `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            link: root.join(CURRENT_LINK),
        }
    }
}

#[async_trait]
impl Activation for SymlinkActivation {
    #[cfg(unix)]
    async fn activate(&self, installation: &VersionInstallation) -> Result<()> {
        let staging = self.link.with_file_name(format!(".{CURRENT_LINK}.next"));
        let _ = tokio::fs::remove_file(&staging).await;
        tokio::fs::symlink(&installation.dir, &staging).await?;
        // rename(2) replaces the old link in one step.
        tokio::fs::rename(&staging, &self.link).await?;
        info!(
            "{} -> {}",
            self.link.display(),
            installation.dir.display()
        );
        Ok(())
    }

    #[cfg(not(unix))]
    async fn activate(&self, _installation: &VersionInstallation) -> Result<()> {
        Err(Error::Activation(
            "symlink activation is only supported on unix".into(),
        ))
    }
}

/// Rewrites the `ExecStart=` line of a service unit file.
#[derive(Debug, Clone)]
pub struct UnitFileActivation {
    unit_path: PathBuf,
    exec_start: String,
}

impl UnitFileActivation {
    /// Rewrite `unit_path` using `exec_start`.
    ///
    /// `{version}`, `{version_dir}` and `{script}` in the template are
    /// replaced with the activated installation's values.
    #[must_use]
    pub fn new(unit_path: PathBuf, exec_start: String) -> Self {
        Self {
            unit_path,
            exec_start,
        }
    }

    fn render(&self, installation: &VersionInstallation) -> String {
        self.exec_start
            .replace("{version_dir}", &installation.dir.display().to_string())
            .replace("{script}", &installation.script.display().to_string())
            .replace("{version}", &installation.version)
    }
}

/// Replace every `ExecStart=` line in `unit` with `ExecStart=<command>`.
///
/// # Errors
///
/// Returns [`Error::Activation`] if the unit has no `ExecStart=` line.
pub fn rewrite_exec_start(unit: &str, command: &str) -> Result<String> {
    let mut found = false;
    let mut out = String::with_capacity(unit.len() + command.len());
    for line in unit.split_inclusive('\n') {
        if line.trim_start().starts_with("ExecStart=") {
            found = true;
            out.push_str("ExecStart=");
            out.push_str(command);
            if line.ends_with('\n') {
                out.push('\n');
            }
        } else {
            out.push_str(line);
        }
    }
    if found {
        Ok(out)
    } else {
        Err(Error::Activation("unit file has no ExecStart= line".into()))
    }
}

#[async_trait]
impl Activation for UnitFileActivation {
    async fn activate(&self, installation: &VersionInstallation) -> Result<()> {
        let unit = tokio::fs::read_to_string(&self.unit_path).await?;
        let rewritten = rewrite_exec_start(&unit, &self.render(installation))?;
        crate::store::write_atomic(&self.unit_path, rewritten.as_bytes())?;
        info!(
            "Updated {} for version {}",
            self.unit_path.display(),
            installation.version
        );
        Ok(())
    }
}

/// Build the strategy described by `config`.
///
/// # Errors
///
/// Returns [`Error::Config`] if `unit-file` is selected without a unit path.
pub fn from_config(config: &ActivationConfig, root: &Path) -> Result<Box<dyn Activation>> {
    Ok(match config.kind {
        ActivationKind::None => Box::new(NoActivation),
        ActivationKind::Symlink => Box::new(SymlinkActivation::new(root)),
        ActivationKind::UnitFile => {
            let unit_path = config.unit_path.clone().ok_or_else(|| {
                Error::Config("unit-file activation requires unit_path".into())
            })?;
            let exec_start = config
                .exec_start
                .clone()
                .unwrap_or_else(|| DEFAULT_EXEC_START.to_string());
            Box::new(UnitFileActivation::new(unit_path, exec_start))
        }
    })
}
