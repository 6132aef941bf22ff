//! Error types for payload-updater.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the updater.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-level failure talking to the remote source.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code returned.
        status: u16,
    },

    /// The remote version document could not be parsed.
    #[error("Invalid version descriptor: {0}")]
    InvalidDescriptor(String),

    /// No persisted version state exists yet.
    #[error("Version state not found: {}", .0.display())]
    StateNotFound(PathBuf),

    /// Persisted version state exists but cannot be parsed.
    #[error("Corrupt version state in {}: {reason}", path.display())]
    CorruptState {
        /// State file path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// Payload could not be decrypted (bad key or damaged ciphertext).
    #[error("Decryption error: {0}")]
    Decryption(String),

    /// Downloaded descriptor names a different version than requested.
    #[error("Version mismatch: expected {expected}, remote descriptor says {found}")]
    VersionMismatch {
        /// Version being installed.
        expected: String,
        /// Version found in the downloaded descriptor.
        found: String,
    },

    /// A required installation artifact is absent.
    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Payload process could not be run.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Activation strategy failed.
    #[error("Activation error: {0}")]
    Activation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from reaching or reading the remote source.
    ///
    /// These are the failures that send a poll cycle down the recovery path.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::HttpStatus { .. } | Self::InvalidDescriptor(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => Self::HttpStatus {
                url: e.url().map(ToString::to_string).unwrap_or_default(),
                status: status.as_u16(),
            },
            None => Self::Transport(e.to_string()),
        }
    }
}
