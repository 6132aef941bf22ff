//! Agent implementation: the poll-then-run loop around the coordinator.

use crate::cipher::{Cipher, SivCipher};
use crate::config::{UpdaterConfig, NO_VERSION};
use crate::coordinator::{PollOutcome, UpdateCoordinator};
use crate::error::Result;
use crate::event::{create_event_channel, UpdaterEvent, UpdaterEventsChannel, UpdaterEventsSender};
use crate::runner::{PayloadRunner, ProcessRunner, RunReport};
use crate::transport::{HttpTransport, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Builder for constructing an agent.
pub struct AgentBuilder {
    config: UpdaterConfig,
    transport: Option<Arc<dyn Transport>>,
    cipher: Option<Arc<dyn Cipher>>,
    runner: Option<Arc<dyn PayloadRunner>>,
}

impl AgentBuilder {
    /// Create a new agent builder with the given configuration.
    #[must_use]
    pub fn new(config: UpdaterConfig) -> Self {
        Self {
            config,
            transport: None,
            cipher: None,
            runner: None,
        }
    }

    /// Use `transport` instead of HTTPS.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use `cipher` instead of the default payload cipher.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Use `runner` instead of spawning the configured interpreter.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn PayloadRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Validate the configuration and assemble the agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete or the
    /// installation root cannot be created.
    pub async fn build(self) -> Result<RunningAgent> {
        info!("Building payload-updater with config: {:?}", self.config);
        self.config.validate()?;

        tokio::fs::create_dir_all(&self.config.install_root).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = create_event_channel();

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.request_timeout())?),
        };
        let cipher = self.cipher.unwrap_or_else(|| Arc::new(SivCipher));
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(ProcessRunner::from_config(&self.config.runner)));

        let coordinator = UpdateCoordinator::from_config(&self.config, transport, cipher)?
            .with_events(events_tx.clone());

        Ok(RunningAgent {
            config: self.config,
            coordinator: Arc::new(coordinator),
            runner,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            events_tx,
            events_rx: Some(events_rx),
        })
    }
}

/// One poll followed by at most one payload run.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// What the poll did.
    pub outcome: PollOutcome,
    /// The payload run, if one happened.
    pub run: Option<RunReport>,
}

/// Requests shutdown of a running agent from elsewhere.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Ask the agent to stop after the current cycle.
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

/// A running agent.
pub struct RunningAgent {
    config: UpdaterConfig,
    coordinator: Arc<UpdateCoordinator>,
    runner: Arc<dyn PayloadRunner>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: UpdaterEventsSender,
    events_rx: Option<UpdaterEventsChannel>,
}

impl RunningAgent {
    /// Get the installation root.
    #[must_use]
    pub fn install_root(&self) -> &PathBuf {
        &self.config.install_root
    }

    /// The coordinator driving updates.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<UpdateCoordinator> {
        &self.coordinator
    }

    /// Get a receiver for agent events.
    ///
    /// Note: Can only be called once. Subsequent calls return None.
    pub fn events(&mut self) -> Option<UpdaterEventsChannel> {
        self.events_rx.take()
    }

    /// Subscribe to agent events.
    #[must_use]
    pub fn subscribe_events(&self) -> UpdaterEventsChannel {
        self.events_tx.subscribe()
    }

    /// Handle that can stop [`Self::run`] from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Request the agent to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Poll once, then run whatever version is now active.
    pub async fn run_cycle(&self) -> CycleReport {
        let outcome = self.coordinator.poll().await;
        let run = self.execute_active(outcome.active_version()).await;
        CycleReport { outcome, run }
    }

    async fn execute_active(&self, version: &str) -> Option<RunReport> {
        if version == NO_VERSION {
            info!("No version installed yet, nothing to run");
            return None;
        }

        let installation = match self.coordinator.installer().installation(version).await {
            Ok(installation) => installation,
            Err(e) => {
                warn!("Version {} is not runnable: {}", version, e);
                return None;
            }
        };

        match self.runner.execute(&installation).await {
            Ok(report) => {
                if report.success() {
                    info!("Version {} ran successfully", version);
                } else {
                    warn!("Version {} exited with {:?}", version, report.exit_code);
                }
                let _ = self.events_tx.send(UpdaterEvent::RunComplete {
                    version: version.to_string(),
                    exit_code: report.exit_code,
                });
                Some(report)
            }
            Err(e) => {
                warn!("Error executing version {}: {}", version, e);
                let _ = self.events_tx.send(UpdaterEvent::Error {
                    message: format!("run of {version} failed: {e}"),
                });
                None
            }
        }
    }

    /// Run cycles until shutdown is requested.
    ///
    /// The first cycle starts immediately. The next one is scheduled only
    /// after the previous poll and run have both finished, so cycles never
    /// overlap however slow the network or payload is. A cycle in progress
    /// is always allowed to finish.
    ///
    /// # Errors
    ///
    /// Currently infallible; cycle failures are logged and retried.
    pub async fn run(&self) -> Result<()> {
        info!("Starting payload-updater");
        let _ = self.events_tx.send(UpdaterEvent::Started);

        let shutdown = self.shutdown_handle();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, initiating shutdown");
                shutdown.shutdown();
            }
        });

        let mut shutdown_rx = self.shutdown_rx.clone();
        let interval = self.config.poll_interval();

        while !*shutdown_rx.borrow() {
            let report = self.run_cycle().await;
            info!(
                "Cycle finished: active version {}, next check in {}s",
                report.outcome.active_version(),
                interval.as_secs()
            );

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                () = tokio::time::sleep(interval) => {}
            }
        }

        ctrl_c.abort();
        let _ = self.events_tx.send(UpdaterEvent::ShuttingDown);
        info!("Agent shutdown complete");
        Ok(())
    }
}
