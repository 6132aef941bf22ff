//! The version-transition state machine.
//!
//! One [`UpdateCoordinator::poll`] call is one cycle:
//!
//! ```text
//!            ┌──────────┐  busy   ┌─────────┐
//!   poll ───►│  guard   ├────────►│ Skipped │
//!            └────┬─────┘         └─────────┘
//!                 ▼
//!          read local state ── corrupt ──► Failed (keep last-known-good)
//!                 ▼
//!         fetch remote version ── error ──► reinstall current ──► Recovered | Failed
//!                 │
//!        ┌────────┴────────┐
//!      equal            different
//!        ▼                 ▼
//!   ensure current    materialize new ── error ──► Failed (pointer unchanged)
//!   is decrypted           ▼
//!        ▼           advance pointer, activate
//!    UpToDate              ▼
//!                      Installed
//! ```
//!
//! The pointer (`currentVersion`) advances only after the new version is
//! fully materialized, so the returned version always names something that
//! installed cleanly.

use crate::activation::{self, Activation, NoActivation};
use crate::cipher::Cipher;
use crate::config::{UpdaterConfig, NO_VERSION};
use crate::error::{Error, Result};
use crate::event::{UpdaterEvent, UpdaterEventsSender};
use crate::installer::{InstallLayout, Installer};
use crate::store::{LocalVersionState, VersionStore};
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another cycle was running; nothing was touched.
    Skipped {
        /// Last-known-good version.
        version: String,
    },
    /// Remote matches the installed version.
    UpToDate {
        /// Installed version.
        version: String,
    },
    /// A new version was installed and is now current.
    Installed {
        /// Previously current version.
        from: String,
        /// Newly current version.
        to: String,
    },
    /// Remote was unreachable; the current version was reinstalled.
    Recovered {
        /// Reinstalled version.
        version: String,
    },
    /// The cycle failed; `version` is what stays active.
    Failed {
        /// Version that stays active.
        version: String,
        /// Why the cycle failed.
        reason: String,
    },
}

impl PollOutcome {
    /// Version the caller should run next.
    #[must_use]
    pub fn active_version(&self) -> &str {
        match self {
            Self::Skipped { version }
            | Self::UpToDate { version }
            | Self::Recovered { version }
            | Self::Failed { version, .. } => version,
            Self::Installed { to, .. } => to,
        }
    }

    /// Whether the poll was dropped because another was in flight.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Clears the busy flag when the cycle ends, whichever way it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives version transitions.
pub struct UpdateCoordinator {
    store: VersionStore,
    installer: Installer,
    transport: Arc<dyn Transport>,
    version_url: String,
    baseline: String,
    activation: Box<dyn Activation>,
    retain_versions: Option<usize>,
    events: Option<UpdaterEventsSender>,
    busy: AtomicBool,
    last_known_good: Mutex<String>,
}

impl UpdateCoordinator {
    /// Create a coordinator.
    ///
    /// `baseline` is the version assumed when no state has been persisted.
    #[must_use]
    pub fn new(
        store: VersionStore,
        installer: Installer,
        transport: Arc<dyn Transport>,
        version_url: String,
        baseline: String,
    ) -> Self {
        Self {
            store,
            installer,
            transport,
            version_url,
            last_known_good: Mutex::new(baseline.clone()),
            baseline,
            activation: Box::new(NoActivation),
            retain_versions: None,
            events: None,
            busy: AtomicBool::new(false),
        }
    }

    /// Build a coordinator, installer and store from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the remote URLs or activation settings
    /// are incomplete.
    pub fn from_config(
        config: &UpdaterConfig,
        transport: Arc<dyn Transport>,
        cipher: Arc<dyn Cipher>,
    ) -> Result<Self> {
        let endpoints = config.endpoints()?;
        let installer = Installer::new(
            InstallLayout::new(config.install_root.clone()),
            endpoints.clone(),
            config.decryption_key.clone(),
            Arc::clone(&transport),
            cipher,
        );
        let activation = activation::from_config(&config.activation, &config.install_root)?;

        let coordinator = Self::new(
            VersionStore::new(config.state_path()),
            installer,
            transport,
            endpoints.version_url,
            config.baseline_version().to_string(),
        )
        .with_activation(activation);
        Ok(match config.retain_versions {
            Some(keep) => coordinator.with_retention(keep),
            None => coordinator,
        })
    }

    /// Use `activation` after each successful update.
    #[must_use]
    pub fn with_activation(mut self, activation: Box<dyn Activation>) -> Self {
        self.activation = activation;
        self
    }

    /// Keep at most `keep` version directories after each update.
    #[must_use]
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.retain_versions = Some(keep);
        self
    }

    /// Publish cycle events on `events`.
    #[must_use]
    pub fn with_events(mut self, events: UpdaterEventsSender) -> Self {
        self.events = Some(events);
        self
    }

    /// The installer used for materialization.
    #[must_use]
    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    /// The persisted version state.
    #[must_use]
    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Version returned by the most recent completed cycle.
    #[must_use]
    pub fn last_known_good(&self) -> String {
        self.last_known_good.lock().clone()
    }

    /// Whether a cycle is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run one update cycle.
    ///
    /// Never fails: every error is logged and turned into an outcome that
    /// keeps the last-known-good version active. A call made while another
    /// is running returns [`PollOutcome::Skipped`] immediately.
    pub async fn poll(&self) -> PollOutcome {
        let Some(_guard) = self.try_begin() else {
            let version = self.last_known_good();
            info!("Already updating version, skipping poll");
            self.emit(UpdaterEvent::PollSkipped {
                version: version.clone(),
            });
            return PollOutcome::Skipped { version };
        };

        let outcome = self.cycle().await;
        *self.last_known_good.lock() = outcome.active_version().to_string();
        outcome
    }

    fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(&self.busy))
    }

    async fn cycle(&self) -> PollOutcome {
        debug!("Checking for a new version");

        let state = match self.store.read_or(&self.baseline) {
            Ok(state) => state,
            Err(e) => {
                let version = self.last_known_good();
                error!("Cannot read version state, keeping {}: {}", version, e);
                self.emit(UpdaterEvent::Error {
                    message: e.to_string(),
                });
                return PollOutcome::Failed {
                    version,
                    reason: e.to_string(),
                };
            }
        };
        debug!(
            "Local state: current {}, new {}",
            state.current_version, state.new_version
        );

        let remote = match self.transport.fetch_descriptor(&self.version_url).await {
            Ok(remote) => remote,
            Err(e) if e.is_transport() => return self.recover(&state.current_version, &e).await,
            Err(e) => {
                error!("Version check failed, keeping {}: {}", state.current_version, e);
                return PollOutcome::Failed {
                    version: state.current_version,
                    reason: e.to_string(),
                };
            }
        };

        if remote.version == state.current_version {
            self.settle(&state).await
        } else {
            self.upgrade(&state, remote.version).await
        }
    }

    /// Remote unreachable: reinstall the current version so a transient
    /// outage cannot leave us without a runnable payload.
    async fn recover(&self, current: &str, cause: &Error) -> PollOutcome {
        warn!("Error checking for new version: {}", cause);

        if current == NO_VERSION {
            return PollOutcome::Failed {
                version: current.to_string(),
                reason: cause.to_string(),
            };
        }

        info!("Reinstalling {} from scratch", current);
        match self.installer.rematerialize(current).await {
            Ok(_) => {
                self.emit(UpdaterEvent::Recovered {
                    version: current.to_string(),
                });
                PollOutcome::Recovered {
                    version: current.to_string(),
                }
            }
            Err(e) => {
                warn!("Reinstall of {} failed: {}", current, e);
                PollOutcome::Failed {
                    version: current.to_string(),
                    reason: format!("{cause}; reinstall failed: {e}"),
                }
            }
        }
    }

    /// Remote matches: make sure the current version is actually runnable.
    async fn settle(&self, state: &LocalVersionState) -> PollOutcome {
        let current = &state.current_version;
        info!("Already on the latest version {}", current);

        if state.is_pending() {
            // An update to another version was abandoned upstream.
            if let Err(e) = self.store.write(&LocalVersionState::settled(current.clone())) {
                warn!("Could not clear pending version {}: {}", state.new_version, e);
            }
        }

        if let Err(e) = self.ensure_runnable(current).await {
            warn!("Version {} is not runnable: {}", current, e);
            return PollOutcome::Failed {
                version: current.clone(),
                reason: e.to_string(),
            };
        }

        self.emit(UpdaterEvent::UpToDate {
            version: current.clone(),
        });
        PollOutcome::UpToDate {
            version: current.clone(),
        }
    }

    async fn ensure_runnable(&self, version: &str) -> Result<()> {
        match self.installer.ensure_decrypted(version).await {
            Ok(decrypted) => {
                if decrypted {
                    info!("Decrypted payload for {} restored", version);
                }
                Ok(())
            }
            Err(Error::MissingArtifact(path)) => {
                debug!("{} missing, resuming install of {}", path.display(), version);
                self.installer.materialize(version).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Remote differs: install it, then advance the pointer.
    async fn upgrade(&self, state: &LocalVersionState, target: String) -> PollOutcome {
        let current = state.current_version.clone();
        info!("Version has changed from {} to {}", current, target);
        self.emit(UpdaterEvent::UpdateStarted {
            from: current.clone(),
            to: target.clone(),
        });

        if state.new_version != target {
            let pending = LocalVersionState {
                current_version: current.clone(),
                new_version: target.clone(),
            };
            if let Err(e) = self.store.write(&pending) {
                return self.fail_update(current, &target, &e);
            }
        }

        let installation = match self.installer.materialize(&target).await {
            Ok(installation) => installation,
            Err(e) => return self.fail_update(current, &target, &e),
        };

        if let Err(e) = self.store.write(&LocalVersionState::settled(target.clone())) {
            return self.fail_update(current, &target, &e);
        }
        info!("Now on version {}", target);
        self.emit(UpdaterEvent::UpdateComplete {
            version: target.clone(),
        });

        if let Err(e) = self.activation.activate(&installation).await {
            warn!("Activation of {} failed: {}", target, e);
            self.emit(UpdaterEvent::Error {
                message: format!("activation of {target} failed: {e}"),
            });
        }

        if let Some(keep) = self.retain_versions {
            let protect = [target.as_str(), current.as_str()];
            if let Err(e) = self.installer.prune(keep, &protect).await {
                warn!("Pruning old versions failed: {}", e);
            }
        }

        PollOutcome::Installed {
            from: current,
            to: target,
        }
    }

    fn fail_update(&self, current: String, target: &str, e: &Error) -> PollOutcome {
        warn!("Update to {} failed, staying on {}: {}", target, current, e);
        self.emit(UpdaterEvent::UpdateFailed {
            version: target.to_string(),
            message: e.to_string(),
        });
        PollOutcome::Failed {
            version: current,
            reason: e.to_string(),
        }
    }

    fn emit(&self, event: UpdaterEvent) {
        if let Some(ref events) = self.events {
            let _ = events.send(event);
        }
    }
}
