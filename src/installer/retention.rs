//! Optional pruning of old version directories.

use super::Installer;
use crate::error::Result;
use semver::Version;
use tracing::{info, warn};

impl Installer {
    /// Remove version directories beyond the newest `keep`.
    ///
    /// Only directories named by a semantic version are candidates, ordered
    /// newest first. Versions in `protect` are never removed. Returns the
    /// versions that were deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the installation root cannot be listed. Failures
    /// removing an individual directory are logged and skipped.
    pub async fn prune(&self, keep: usize, protect: &[&str]) -> Result<Vec<String>> {
        let mut versions: Vec<(Version, String)> = Vec::new();
        let mut entries = tokio::fs::read_dir(self.layout.root()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Ok(version) = Version::parse(&name) {
                versions.push((version, name));
            }
        }
        versions.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = Vec::new();
        for (_, name) in versions.into_iter().skip(keep) {
            if protect.contains(&name.as_str()) {
                continue;
            }
            let dir = self.layout.version_dir(&name);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    info!("Pruned old version {}", name);
                    removed.push(name);
                }
                Err(e) => warn!("Could not prune {}: {}", dir.display(), e),
            }
        }
        Ok(removed)
    }
}
