//! Materializes versions on disk.
//!
//! Each version gets its own directory holding the downloaded descriptor, the
//! encrypted payload and the decrypted payload. Every artifact is written to a
//! `.part` file and renamed into place, and each finished step is recorded in
//! `manifest.json`, so an install interrupted at any point resumes from the
//! first missing step.

mod layout;
mod manifest;
mod retention;

pub use layout::{part_path, InstallLayout, VersionInstallation};
pub use manifest::{InstallManifest, Step};

use crate::cipher::Cipher;
use crate::config::{Credential, RemoteEndpoints};
use crate::error::{Error, Result};
use crate::transport::Transport;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Downloads and decrypts versions into an [`InstallLayout`].
pub struct Installer {
    layout: InstallLayout,
    endpoints: RemoteEndpoints,
    key: Credential,
    transport: Arc<dyn Transport>,
    cipher: Arc<dyn Cipher>,
}

impl Installer {
    /// Create an installer.
    #[must_use]
    pub fn new(
        layout: InstallLayout,
        endpoints: RemoteEndpoints,
        key: Credential,
        transport: Arc<dyn Transport>,
        cipher: Arc<dyn Cipher>,
    ) -> Self {
        Self {
            layout,
            endpoints,
            key,
            transport,
            cipher,
        }
    }

    /// The layout this installer writes into.
    #[must_use]
    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// Make every artifact of `version` present, resuming partial installs.
    ///
    /// Steps already recorded in the manifest whose artifact is still on
    /// disk are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error. Completed steps stay recorded
    /// so the next call resumes after them, except that a failed decryption
    /// also forgets the downloaded payload.
    pub async fn materialize(&self, version: &str) -> Result<VersionInstallation> {
        let dir = self.prepare_dir(version).await?;

        let manifest_path = self.layout.manifest_path(version);
        let mut manifest = InstallManifest::load(&manifest_path, version);

        let descriptor = self.layout.descriptor_path(version);
        if manifest.is_done(Step::Descriptor) && descriptor.exists() {
            debug!("{}: descriptor present", version);
        } else {
            let part = part_path(&descriptor);
            staged(&part, self.fetch_descriptor(version, &part)).await?;
            tokio::fs::rename(&part, &descriptor).await?;
            manifest.record(Step::Descriptor);
            manifest.save(&manifest_path)?;
        }

        let payload = self.layout.payload_path(version);
        if manifest.is_done(Step::Payload) && payload.exists() {
            debug!("{}: encrypted payload present", version);
        } else {
            let part = part_path(&payload);
            staged(&part, self.fetch_payload(&part)).await?;
            tokio::fs::rename(&part, &payload).await?;
            manifest.record(Step::Payload);
            manifest.save(&manifest_path)?;
        }

        let sha256 = match self.verified_digest(&manifest, version).await {
            Some(digest) => digest,
            None => self.decrypt(version, &mut manifest).await?,
        };

        info!("Version {} materialized in {}", version, dir.display());
        Ok(self.handle(version, sha256))
    }

    /// Reinstall `version` from scratch, ignoring what is already on disk.
    ///
    /// All artifacts are staged first and only swapped in once every step has
    /// succeeded, so a failure leaves the existing installation untouched.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub async fn rematerialize(&self, version: &str) -> Result<VersionInstallation> {
        let dir = self.prepare_dir(version).await?;

        let targets = [
            self.layout.descriptor_path(version),
            self.layout.payload_path(version),
            self.layout.script_path(version),
        ];
        let parts = targets.clone().map(|p| part_path(&p));

        let staging = async {
            self.fetch_descriptor(version, &parts[0]).await?;
            self.fetch_payload(&parts[1]).await?;
            self.cipher
                .decrypt_file(&parts[1], &parts[2], &self.key)
                .await?;
            plaintext_digest(&parts[2]).await
        };

        let sha256 = match staging.await {
            Ok(digest) => digest,
            Err(e) => {
                for part in &parts {
                    discard(part).await;
                }
                return Err(e);
            }
        };

        // Invalidate first so a crash mid-swap resumes instead of trusting stale entries.
        let manifest_path = self.layout.manifest_path(version);
        InstallManifest::fresh(version).save(&manifest_path)?;
        for (part, target) in parts.iter().zip(&targets) {
            tokio::fs::rename(part, target).await?;
        }

        let mut manifest = InstallManifest::fresh(version);
        manifest.record(Step::Descriptor);
        manifest.record(Step::Payload);
        manifest.record_decrypted(sha256.clone());
        manifest.save(&manifest_path)?;

        info!("Version {} reinstalled in {}", version, dir.display());
        Ok(self.handle(version, sha256))
    }

    /// Decrypt `version`'s payload unless a verified plaintext already exists.
    ///
    /// Returns `false` when nothing had to be done.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingArtifact`] if the encrypted payload has not
    /// been downloaded, or the cipher's error if decryption fails.
    pub async fn ensure_decrypted(&self, version: &str) -> Result<bool> {
        let manifest_path = self.layout.manifest_path(version);
        let mut manifest = InstallManifest::load(&manifest_path, version);

        if self.verified_digest(&manifest, version).await.is_some() {
            debug!("{}: decrypted payload already present", version);
            return Ok(false);
        }

        let payload = self.layout.payload_path(version);
        if !(manifest.is_done(Step::Payload) && payload.exists()) {
            return Err(Error::MissingArtifact(payload));
        }

        self.decrypt(version, &mut manifest).await?;
        Ok(true)
    }

    /// Whether `version` is fully installed and its plaintext is intact.
    pub async fn is_complete(&self, version: &str) -> bool {
        let manifest = InstallManifest::load(&self.layout.manifest_path(version), version);
        manifest.is_complete()
            && self.layout.descriptor_path(version).exists()
            && self.layout.payload_path(version).exists()
            && self.verified_digest(&manifest, version).await.is_some()
    }

    /// Handle for a complete installation of `version`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingArtifact`] if `version` is not complete.
    pub async fn installation(&self, version: &str) -> Result<VersionInstallation> {
        let manifest = InstallManifest::load(&self.layout.manifest_path(version), version);
        match self.verified_digest(&manifest, version).await {
            Some(sha256) if manifest.is_complete() => Ok(self.handle(version, sha256)),
            _ => Err(Error::MissingArtifact(self.layout.script_path(version))),
        }
    }

    /// Create `version`'s directory, refusing anything under the root that
    /// is not a plain directory (links, the state file).
    async fn prepare_dir(&self, version: &str) -> Result<PathBuf> {
        let dir = self.layout.version_dir(version);
        match tokio::fs::symlink_metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::InvalidDescriptor(format!(
                    "{} is not a version directory",
                    dir.display()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&dir).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(dir)
    }

    async fn fetch_descriptor(&self, version: &str, dest: &Path) -> Result<()> {
        let body = self.transport.fetch(&self.endpoints.version_url).await?;
        let descriptor = crate::descriptor::VersionDescriptor::parse(&body)?;
        if descriptor.version != version {
            return Err(Error::VersionMismatch {
                expected: version.to_string(),
                found: descriptor.version,
            });
        }
        tokio::fs::write(dest, &body).await?;
        Ok(())
    }

    async fn fetch_payload(&self, dest: &Path) -> Result<()> {
        let bytes = self
            .transport
            .download(&self.endpoints.payload_url, dest)
            .await?;
        if bytes == 0 {
            return Err(Error::Transport(format!(
                "empty payload from {}",
                self.endpoints.payload_url
            )));
        }
        Ok(())
    }

    async fn decrypt(&self, version: &str, manifest: &mut InstallManifest) -> Result<String> {
        let payload = self.layout.payload_path(version);
        let script = self.layout.script_path(version);
        let part = part_path(&script);

        let decrypted = staged(&part, async {
            self.cipher.decrypt_file(&payload, &part, &self.key).await?;
            plaintext_digest(&part).await
        })
        .await;
        let digest = match decrypted {
            Ok(digest) => digest,
            Err(e @ Error::Decryption(_)) => {
                // The cached ciphertext is suspect; download it again next time.
                manifest.invalidate(Step::Payload);
                manifest.save(&self.layout.manifest_path(version))?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        tokio::fs::rename(&part, &script).await?;

        manifest.record_decrypted(digest.clone());
        manifest.save(&self.layout.manifest_path(version))?;
        debug!("{}: payload decrypted ({})", version, digest);
        Ok(digest)
    }

    /// Digest of the decrypted payload if it matches the manifest.
    async fn verified_digest(&self, manifest: &InstallManifest, version: &str) -> Option<String> {
        if !manifest.is_done(Step::Decrypted) {
            return None;
        }
        let expected = manifest.plaintext_sha256.as_deref()?;
        let script = self.layout.script_path(version);
        match plaintext_digest(&script).await {
            Ok(actual) if actual == expected => Some(actual),
            Ok(_) => {
                warn!("{}: decrypted payload does not match manifest", version);
                None
            }
            Err(_) => None,
        }
    }

    fn handle(&self, version: &str, sha256: String) -> VersionInstallation {
        VersionInstallation {
            version: version.to_string(),
            dir: self.layout.version_dir(version),
            script: self.layout.script_path(version),
            sha256,
        }
    }
}

/// SHA-256 of a decrypted payload; empty output counts as a failed decrypt.
async fn plaintext_digest(path: &Path) -> Result<String> {
    let data = tokio::fs::read(path).await?;
    if data.is_empty() {
        return Err(Error::Decryption(format!(
            "decrypted payload {} is empty",
            path.display()
        )));
    }
    Ok(hex::encode(Sha256::digest(&data)))
}

/// Run `work`, removing the staging file `part` if it fails.
async fn staged<T>(part: &Path, work: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match work.await {
        Ok(value) => Ok(value),
        Err(e) => {
            discard(part).await;
            Err(e)
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}
