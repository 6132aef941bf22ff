//! Per-installation completion marker.
//!
//! Records which materialization steps finished so a resumed install redoes
//! exactly the missing work instead of guessing from file presence.

use crate::error::{Error, Result};
use crate::store::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

/// A materialization step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Version descriptor downloaded.
    Descriptor,
    /// Encrypted payload downloaded.
    Payload,
    /// Payload decrypted.
    Decrypted,
}

/// Contents of `manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallManifest {
    /// Version this manifest describes.
    pub version: String,
    /// When the descriptor was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor_at: Option<DateTime<Utc>>,
    /// When the encrypted payload was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_at: Option<DateTime<Utc>>,
    /// When the payload was decrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decrypted_at: Option<DateTime<Utc>>,
    /// SHA-256 of the decrypted payload, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext_sha256: Option<String>,
}

impl InstallManifest {
    /// Empty manifest for `version`.
    #[must_use]
    pub fn fresh(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..Self::default()
        }
    }

    /// Load the manifest at `path`.
    ///
    /// A missing, unreadable or foreign manifest yields a fresh one; the
    /// only consequence is redoing steps.
    #[must_use]
    pub fn load(path: &Path, version: &str) -> Self {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Cannot read manifest {}: {}", path.display(), e);
                }
                return Self::fresh(version);
            }
        };

        match serde_json::from_slice::<Self>(&data) {
            Ok(manifest) if manifest.version == version => manifest,
            Ok(manifest) => {
                warn!(
                    "Manifest {} describes {}, expected {}; starting over",
                    path.display(),
                    manifest.version,
                    version
                );
                Self::fresh(version)
            }
            Err(e) => {
                warn!("Discarding unreadable manifest {}: {}", path.display(), e);
                Self::fresh(version)
            }
        }
    }

    /// Persist to `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Io(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        write_atomic(path, &json)
    }

    /// Whether `step` has been recorded.
    #[must_use]
    pub fn is_done(&self, step: Step) -> bool {
        match step {
            Step::Descriptor => self.descriptor_at.is_some(),
            Step::Payload => self.payload_at.is_some(),
            Step::Decrypted => self.decrypted_at.is_some() && self.plaintext_sha256.is_some(),
        }
    }

    /// Whether every step has been recorded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is_done(Step::Descriptor) && self.is_done(Step::Payload) && self.is_done(Step::Decrypted)
    }

    /// Record a completed download step.
    ///
    /// A new payload invalidates any earlier decryption.
    pub fn record(&mut self, step: Step) {
        let now = Some(Utc::now());
        match step {
            Step::Descriptor => self.descriptor_at = now,
            Step::Payload => {
                self.payload_at = now;
                self.decrypted_at = None;
                self.plaintext_sha256 = None;
            }
            Step::Decrypted => self.decrypted_at = now,
        }
    }

    /// Record a completed decryption with the plaintext digest.
    pub fn record_decrypted(&mut self, sha256: String) {
        self.record(Step::Decrypted);
        self.plaintext_sha256 = Some(sha256);
    }

    /// Forget `step` and every step after it.
    pub fn invalidate(&mut self, step: Step) {
        if step == Step::Descriptor {
            self.descriptor_at = None;
        }
        if step != Step::Decrypted {
            self.payload_at = None;
        }
        self.decrypted_at = None;
        self.plaintext_sha256 = None;
    }
}
