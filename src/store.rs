//! Persisted record of the installed and most recently observed versions.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Installation status persisted between cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVersionState {
    /// Version fully materialized on disk and eligible to run.
    pub current_version: String,
    /// Version most recently observed from the remote source.
    pub new_version: String,
}

impl LocalVersionState {
    /// State for a single settled version.
    #[must_use]
    pub fn settled(version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            current_version: version.clone(),
            new_version: version,
        }
    }

    /// Whether an observed version has not been installed yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.current_version != self.new_version
    }
}

/// JSON file holding a [`LocalVersionState`].
#[derive(Debug, Clone)]
pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    /// Store backed by the file at `path`.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateNotFound`] if no state has been written,
    /// [`Error::CorruptState`] if the file cannot be parsed, and
    /// [`Error::Io`] for other read failures.
    pub fn read(&self) -> Result<LocalVersionState> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::StateNotFound(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data).map_err(|e| Error::CorruptState {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Read the persisted state, using `default` when none exists.
    ///
    /// A corrupt file is still an error: guessing a version here could hide
    /// an interrupted update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptState`] or [`Error::Io`] as [`Self::read`].
    pub fn read_or(&self, default: &str) -> Result<LocalVersionState> {
        match self.read() {
            Err(Error::StateNotFound(_)) => {
                debug!(
                    "No version state at {}, assuming {}",
                    self.path.display(),
                    default
                );
                Ok(LocalVersionState::settled(default))
            }
            other => other,
        }
    }

    /// Persist `state`, replacing the previous file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the temporary file cannot be written or renamed.
    pub fn write(&self, state: &LocalVersionState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| Error::Io(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        write_atomic(&self.path, &json)?;

        debug!(
            "Wrote version state {} -> {} to {}",
            state.current_version,
            state.new_version,
            self.path.display()
        );
        Ok(())
    }
}

/// Write `data` to a temporary file beside `path`, sync it, then rename over `path`.
///
/// Readers see either the old contents or the new, never a partial file.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
