//! # payload-updater
//!
//! Self-updating agent for encrypted payload scripts.
//!
//! On every cycle the agent fetches a small version document from a remote
//! location. When it names a version other than the one installed, the
//! encrypted payload is downloaded into its own version directory,
//! decrypted, and only then recorded as current. When the remote cannot be
//! reached the installed version is reinstalled in place so the agent keeps
//! running something known to work.
//!
//! ## Layout on disk
//!
//! ```text
//! <install_root>/
//!   versionInfo.json        current/pending version record
//!   1.0.0/
//!     version.json          descriptor as fetched
//!     script.js.enc         encrypted payload
//!     script.js             decrypted payload
//!     manifest.json         completion record
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use payload_updater::{AgentBuilder, UpdaterConfig};
//!
//! #[tokio::main]
//! async fn main() -> payload_updater::Result<()> {
//!     let config = UpdaterConfig::from_file("/etc/payload-updater/config.toml".as_ref())?;
//!     let agent = AgentBuilder::new(config).build().await?;
//!     agent.run().await
//! }
//! ```

pub mod activation;
pub mod agent;
pub mod cipher;
pub mod config;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod installer;
pub mod runner;
pub mod store;
pub mod transport;

pub use agent::{AgentBuilder, CycleReport, RunningAgent, ShutdownHandle};
pub use cipher::{Cipher, SivCipher};
pub use config::{Credential, UpdaterConfig, NO_VERSION};
pub use coordinator::{PollOutcome, UpdateCoordinator};
pub use error::{Error, Result};
pub use event::{UpdaterEvent, UpdaterEventsChannel};
pub use installer::{Installer, VersionInstallation};
pub use runner::{PayloadRunner, ProcessRunner, RunReport};
pub use store::{LocalVersionState, VersionStore};
pub use transport::{HttpTransport, Transport};
