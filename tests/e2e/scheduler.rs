//! Poll-then-run scheduling through the agent.

use super::{FakeRemote, TestHarness};
use async_trait::async_trait;
use parking_lot::Mutex;
use payload_updater::{
    AgentBuilder, PayloadRunner, PollOutcome, Result, RunReport, RunningAgent, UpdaterEvent,
    VersionInstallation,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Records runs instead of spawning an interpreter.
#[derive(Default)]
struct RecordingRunner {
    runs: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    ran: Notify,
}

impl RecordingRunner {
    fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl PayloadRunner for RecordingRunner {
    async fn execute(&self, installation: &VersionInstallation) -> Result<RunReport> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let stdout = tokio::fs::read_to_string(&installation.script).await?;
        self.runs.lock().push(installation.version.clone());
        self.ran.notify_one();
        Ok(RunReport {
            version: installation.version.clone(),
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

async fn agent(h: &TestHarness, runner: &Arc<RecordingRunner>) -> RunningAgent {
    AgentBuilder::new(h.config().clone())
        .with_transport(h.remote().clone())
        .with_runner(runner.clone())
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_cycle_installs_then_runs() {
    let h = TestHarness::setup();
    h.remote().publish("1.0.0", "console.log('hi')");
    let runner = Arc::new(RecordingRunner::default());
    let agent = agent(&h, &runner).await;

    let report = agent.run_cycle().await;
    assert_eq!(report.outcome.active_version(), "1.0.0");
    let run = report.run.unwrap();
    assert!(run.success());
    assert_eq!(run.stdout, "console.log('hi')");
    assert_eq!(runner.runs(), vec!["1.0.0".to_string()]);
}

#[tokio::test]
async fn test_cycle_without_installation_runs_nothing() {
    let h = TestHarness::setup();
    h.remote().set_outage(true);
    let runner = Arc::new(RecordingRunner::default());
    let agent = agent(&h, &runner).await;

    let report = agent.run_cycle().await;
    assert!(matches!(report.outcome, PollOutcome::Failed { .. }));
    assert!(report.run.is_none());
    assert!(runner.runs().is_empty());
}

#[tokio::test]
async fn test_failed_update_runs_previous_version() {
    let h = TestHarness::setup();
    h.remote().publish("1.0.0", "one");
    let runner = Arc::new(RecordingRunner::default());
    let agent = agent(&h, &runner).await;
    agent.run_cycle().await;

    h.remote().publish_with_key("2.0.0", "two", "wrong");
    let report = agent.run_cycle().await;
    assert_eq!(report.run.unwrap().stdout, "one");
    assert_eq!(runner.runs(), vec!["1.0.0".to_string(), "1.0.0".to_string()]);
}

#[tokio::test]
async fn test_run_loop_never_overlaps_cycles() {
    let h = TestHarness::setup_with(|c| c.poll_interval_secs = 0);
    h.remote().publish("1.0.0", "a");
    let runner = Arc::new(RecordingRunner::default());
    let agent = Arc::new(agent(&h, &runner).await);
    let mut events = agent.subscribe_events();
    let shutdown = agent.shutdown_handle();

    let running = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run().await }
    });

    tokio::time::timeout(Duration::from_secs(10), async {
        while runner.runs().len() < 3 {
            runner.ran.notified().await;
        }
    })
    .await
    .expect("agent stopped cycling");

    shutdown.shutdown();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("agent did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(runner.max_in_flight.load(Ordering::SeqCst), 1);
    // Only the first cycle fetches the payload.
    assert_eq!(h.remote().fetches(&FakeRemote::payload_url()), 1);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.first(), Some(&UpdaterEvent::Started));
    assert_eq!(seen.last(), Some(&UpdaterEvent::ShuttingDown));
}

#[tokio::test]
async fn test_next_cycle_waits_for_interval() {
    let h = TestHarness::setup_with(|c| c.poll_interval_secs = 3600);
    h.remote().publish("1.0.0", "a");
    let runner = Arc::new(RecordingRunner::default());
    let agent = Arc::new(agent(&h, &runner).await);
    let shutdown = agent.shutdown_handle();

    let running = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run().await }
    });

    tokio::time::timeout(Duration::from_secs(5), runner.ran.notified())
        .await
        .expect("first cycle never ran");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runner.runs().len(), 1);

    shutdown.shutdown();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("shutdown did not interrupt the wait")
        .unwrap()
        .unwrap();
    assert_eq!(h.remote().fetches(&FakeRemote::version_url()), 2);
}
