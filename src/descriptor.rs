//! Remote version document.

use crate::activation::CURRENT_LINK;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// The document naming the currently published version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// Published version (semver or an opaque tag).
    pub version: String,
}

impl VersionDescriptor {
    /// Parse a descriptor from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] if the bytes are not a JSON object
    /// with a non-empty string `version` field.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let descriptor: Self =
            serde_json::from_slice(bytes).map_err(|e| Error::InvalidDescriptor(e.to_string()))?;
        descriptor.check()?;
        Ok(descriptor)
    }

    fn check(&self) -> Result<()> {
        let v = self.version.trim();
        if v.is_empty() {
            return Err(Error::InvalidDescriptor("empty version".into()));
        }
        // Versions name directories on disk, next to the state file and links.
        if v.starts_with('.') || v.contains(['/', '\\']) || v == CURRENT_LINK {
            return Err(Error::InvalidDescriptor(format!(
                "version {v:?} is not usable as a directory name"
            )));
        }
        Ok(())
    }
}
