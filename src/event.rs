//! Updater event system.

use tokio::sync::broadcast;

/// Events emitted by the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdaterEvent {
    /// Agent has started.
    Started,

    /// Agent is shutting down.
    ShuttingDown,

    /// A poll arrived while another was still running and was dropped.
    PollSkipped {
        /// Version still active.
        version: String,
    },

    /// Remote version matches the installed one.
    UpToDate {
        /// Installed version.
        version: String,
    },

    /// Upgrade started.
    UpdateStarted {
        /// Version installed before the update.
        from: String,
        /// Version being installed.
        to: String,
    },

    /// Upgrade completed and the version pointer advanced.
    UpdateComplete {
        /// New version.
        version: String,
    },

    /// Upgrade failed; the previous version stays active.
    UpdateFailed {
        /// Version that failed to install.
        version: String,
        /// Error message.
        message: String,
    },

    /// Remote was unreachable and the installed version was reinstalled.
    Recovered {
        /// Reinstalled version.
        version: String,
    },

    /// Payload run finished.
    RunComplete {
        /// Version that ran.
        version: String,
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
    },

    /// Error occurred.
    Error {
        /// Error message.
        message: String,
    },
}

/// Channel for receiving updater events.
pub type UpdaterEventsChannel = broadcast::Receiver<UpdaterEvent>;

/// Sender for updater events.
pub type UpdaterEventsSender = broadcast::Sender<UpdaterEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (UpdaterEventsSender, UpdaterEventsChannel) {
    broadcast::channel(256)
}
