//! Remote fetch.
//!
//! The updater only needs "GET this URL": [`Transport`] is that seam, with
//! [`HttpTransport`] as the production implementation.

use crate::descriptor::VersionDescriptor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Fetches raw bytes from a URL.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and return the response body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpStatus`] for non-2xx responses and
    /// [`Error::Transport`] for connection failures.
    async fn fetch(&self, url: &str) -> Result<Bytes>;

    /// GET `url` and write the body to `dest`, returning the byte count.
    ///
    /// # Errors
    ///
    /// Propagates fetch errors and filesystem errors writing `dest`.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let body = self.fetch(url).await?;
        tokio::fs::write(dest, &body).await?;
        debug!("Downloaded {} bytes from {} to {}", body.len(), url, dest.display());
        Ok(body.len() as u64)
    }

    /// Fetch and parse the version document at `url`.
    ///
    /// # Errors
    ///
    /// Returns fetch errors, or [`Error::InvalidDescriptor`] for malformed JSON.
    async fn fetch_descriptor(&self, url: &str) -> Result<VersionDescriptor> {
        let body = self.fetch(url).await?;
        VersionDescriptor::parse(&body)
    }
}

/// HTTPS transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("payload-updater/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().await?)
    }
}
