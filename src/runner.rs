//! Runs an installed payload.

use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::installer::VersionInstallation;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one payload run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Version that ran.
    pub version: String,
    /// Exit code, `None` if killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RunReport {
    /// Whether the payload exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes the payload of an installed version.
///
/// Running a version never changes whether it is installed.
#[async_trait]
pub trait PayloadRunner: Send + Sync {
    /// Run `installation`'s payload to completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] if the payload cannot be started or
    /// exceeds its time limit. A non-zero exit is reported in the
    /// [`RunReport`], not as an error.
    async fn execute(&self, installation: &VersionInstallation) -> Result<RunReport>;
}

/// Runs `<interpreter> <args..> <script>` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    /// Runner with an explicit interpreter and no time limit.
    #[must_use]
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Runner built from configuration.
    #[must_use]
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            args: config.args.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    /// Add arguments placed before the script path.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Kill the payload if it runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl PayloadRunner for ProcessRunner {
    async fn execute(&self, installation: &VersionInstallation) -> Result<RunReport> {
        debug!(
            "Running {} {:?} {}",
            self.interpreter,
            self.args,
            installation.script.display()
        );

        let child = tokio::process::Command::new(&self.interpreter)
            .args(&self.args)
            .arg(&installation.script)
            .current_dir(&installation.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Execution(format!("failed to spawn {}: {e}", self.interpreter)))?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    Error::Execution(format!(
                        "version {} exceeded {}s",
                        installation.version,
                        limit.as_secs()
                    ))
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| Error::Execution(e.to_string()))?;

        let report = RunReport {
            version: installation.version.clone(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        for line in report.stdout.lines() {
            info!(version = %report.version, "{}", line);
        }
        for line in report.stderr.lines() {
            warn!(version = %report.version, "{}", line);
        }

        Ok(report)
    }
}
