//! Version transition scenarios.

use super::{FakeRemote, TestHarness};
use payload_updater::{LocalVersionState, PollOutcome, NO_VERSION};
use proptest::prelude::*;
use std::collections::HashSet;

fn settled(version: &str) -> Option<LocalVersionState> {
    Some(LocalVersionState::settled(version))
}

/// Fresh host, remote publishes 1.0.0.
#[tokio::test]
async fn test_first_install() {
    let h = TestHarness::setup();
    h.remote().publish("1.0.0", "console.log('1.0.0')");

    let outcome = h.poll().await;
    assert_eq!(
        outcome,
        PollOutcome::Installed {
            from: NO_VERSION.into(),
            to: "1.0.0".into()
        }
    );
    assert_eq!(h.state(), settled("1.0.0"));
    assert_eq!(h.script("1.0.0").as_deref(), Some("console.log('1.0.0')"));
    assert!(h.version_dir("1.0.0").join("version.json").exists());
    assert!(h.version_dir("1.0.0").join("script.js.enc").exists());
    assert!(h.coordinator().installer().is_complete("1.0.0").await);
}

/// Unchanged remote with the payload already decrypted does no work.
#[tokio::test]
async fn test_up_to_date_does_nothing() {
    let h = TestHarness::setup();
    h.remote().publish("1.0.0", "a");
    h.poll().await;

    let version_checks = h.remote().fetches(&FakeRemote::version_url());
    let payload_fetches = h.remote().fetches(&FakeRemote::payload_url());
    let decryptions = h.decryptions();
    let state = h.state_bytes();

    let outcome = h.poll().await;
    assert_eq!(outcome, PollOutcome::UpToDate { version: "1.0.0".into() });
    assert_eq!(h.remote().fetches(&FakeRemote::version_url()), version_checks + 1);
    assert_eq!(h.remote().fetches(&FakeRemote::payload_url()), payload_fetches);
    assert_eq!(h.decryptions(), decryptions);
    assert_eq!(h.state_bytes(), state);
}

/// Remote down: the installed version stays active and intact.
#[tokio::test]
async fn test_remote_outage_keeps_current() {
    let h = TestHarness::setup();
    h.remote().publish("1.0.0", "a");
    h.poll().await;
    let state = h.state_bytes();

    h.remote().set_outage(true);
    let outcome = h.poll().await;

    assert_eq!(outcome.active_version(), "1.0.0");
    assert!(matches!(outcome, PollOutcome::Failed { .. }));
    assert_eq!(h.state_bytes(), state);
    assert!(h.coordinator().installer().is_complete("1.0.0").await);
    assert_eq!(h.script("1.0.0").as_deref(), Some("a"));
}

/// A version check that fails once triggers a reinstall of the current version.
#[tokio::test]
async fn test_transient_outage_reinstalls_current() {
    let h = TestHarness::setup();
    h.remote().publish("1.0.0", "a");
    h.poll().await;
    let payload_fetches = h.remote().fetches(&FakeRemote::payload_url());

    h.remote().fail_nth(0);
    let outcome = h.poll().await;

    assert_eq!(outcome, PollOutcome::Recovered { version: "1.0.0".into() });
    assert_eq!(h.remote().fetches(&FakeRemote::payload_url()), payload_fetches + 1);
    assert_eq!(h.state(), settled("1.0.0"));
    assert!(h.coordinator().installer().is_complete("1.0.0").await);
}

/// Bad key for the new version: old version stays current.
#[tokio::test]
async fn test_decrypt_failure_keeps_previous_version() {
    let h = TestHarness::setup();
    h.remote().publish("1.0.0", "a");
    h.poll().await;

    h.remote().publish_with_key("2.0.0", "b", "not-the-key");
    let outcome = h.poll().await;

    assert_eq!(outcome.active_version(), "1.0.0");
    assert!(matches!(outcome, PollOutcome::Failed { .. }));
    let state = h.state().unwrap();
    assert_eq!(state.current_version, "1.0.0");
    assert_eq!(state.new_version, "2.0.0");
    assert!(h.version_dir("2.0.0").is_dir());
    assert!(h.script("2.0.0").is_none());
    assert_eq!(h.script("1.0.0").as_deref(), Some("a"));

    // Republished correctly under the same version.
    h.remote().publish("2.0.0", "b");
    let outcome = h.poll().await;
    assert_eq!(
        outcome,
        PollOutcome::Installed {
            from: "1.0.0".into(),
            to: "2.0.0".into()
        }
    );
    assert_eq!(h.state(), settled("2.0.0"));
}

/// A poll arriving mid-cycle is dropped without touching disk.
#[tokio::test]
async fn test_overlapping_poll_is_skipped() {
    let h = TestHarness::setup();
    h.remote().publish("1.0.0", "a");
    h.remote().hold();

    let coordinator = h.coordinator().clone();
    let first = tokio::spawn(async move { coordinator.poll().await });
    h.wait_until_busy().await;

    let second = h.poll().await;
    assert!(second.is_skipped());
    assert_eq!(second, PollOutcome::Skipped { version: NO_VERSION.into() });
    assert!(h.state_bytes().is_none());
    assert!(!h.version_dir("1.0.0").exists());
    assert_eq!(h.remote().fetches(&FakeRemote::version_url()), 1);

    h.remote().release();
    let first = first.await.unwrap();
    assert_eq!(first.active_version(), "1.0.0");
    assert!(!h.coordinator().is_busy());
    assert_eq!(h.state(), settled("1.0.0"));
}

/// Configured initial version is completed on first run instead of reinstalled.
#[tokio::test]
async fn test_initial_version_is_materialized() {
    let h = TestHarness::setup_with(|c| c.initial_version = Some("1.0.0".into()));
    h.remote().publish("1.0.0", "a");

    let outcome = h.poll().await;
    assert_eq!(outcome, PollOutcome::UpToDate { version: "1.0.0".into() });
    assert_eq!(h.script("1.0.0").as_deref(), Some("a"));
}

/// Nothing installed and remote unreachable: nothing to recover.
#[tokio::test]
async fn test_outage_before_first_install() {
    let h = TestHarness::setup();
    h.remote().set_outage(true);

    let outcome = h.poll().await;
    assert_eq!(outcome.active_version(), NO_VERSION);
    assert!(h.state_bytes().is_none());
}

/// Unreadable state leaves the last version that worked active.
#[tokio::test]
async fn test_corrupt_state_keeps_last_known_good() {
    let h = TestHarness::setup();
    h.remote().publish("1.0.0", "a");
    h.poll().await;

    std::fs::write(h.config().state_path(), b"{\"currentVersion\":").unwrap();
    h.remote().publish("2.0.0", "b");
    let outcome = h.poll().await;

    assert!(matches!(outcome, PollOutcome::Failed { .. }));
    assert_eq!(outcome.active_version(), "1.0.0");
    assert!(!h.version_dir("2.0.0").exists());
}

/// Symlink activation and retention run after each update.
#[cfg(unix)]
#[tokio::test]
async fn test_activation_and_retention() {
    use payload_updater::config::ActivationKind;

    let h = TestHarness::setup_with(|c| {
        c.activation.kind = ActivationKind::Symlink;
        c.retain_versions = Some(2);
    });

    for version in ["1.0.0", "1.1.0", "1.2.0"] {
        h.remote().publish(version, version);
        assert_eq!(h.poll().await.active_version(), version);
    }

    assert!(!h.version_dir("1.0.0").exists());
    assert!(h.version_dir("1.1.0").is_dir());
    assert!(h.version_dir("1.2.0").is_dir());
    let link = std::fs::read_link(h.root().join("current")).unwrap();
    assert_eq!(link, h.version_dir("1.2.0"));
}

/// A remote version named like the activation link cannot clobber the install.
#[cfg(unix)]
#[tokio::test]
async fn test_reserved_version_name_keeps_current_install() {
    use payload_updater::config::ActivationKind;

    let h = TestHarness::setup_with(|c| c.activation.kind = ActivationKind::Symlink);
    h.remote().publish("1.0.0", "one");
    h.poll().await;

    h.remote().publish("current", "evil");
    let outcome = h.poll().await;

    assert!(matches!(outcome, PollOutcome::Failed { .. }));
    assert_eq!(outcome.active_version(), "1.0.0");
    assert_eq!(h.script("1.0.0").as_deref(), Some("one"));
    assert!(h.coordinator().installer().is_complete("1.0.0").await);
    assert_eq!(h.state(), settled("1.0.0"));
    let link = std::fs::read_link(h.root().join("current")).unwrap();
    assert_eq!(link, h.version_dir("1.0.0"));
}

/// Unit file activation rewrites ExecStart for the new version.
#[tokio::test]
async fn test_unit_file_activation() {
    use payload_updater::config::ActivationKind;

    let scratch = tempfile::tempdir().unwrap();
    let unit = scratch.path().join("updater.service");
    std::fs::write(&unit, "[Service]\nExecStart=/usr/bin/node /opt/old.js\n").unwrap();

    let unit_path = unit.clone();
    let h = TestHarness::setup_with(move |c| {
        c.activation.kind = ActivationKind::UnitFile;
        c.activation.unit_path = Some(unit_path);
        c.activation.exec_start = Some("/usr/bin/node {script}".into());
    });
    h.remote().publish("3.1.0", "x");
    h.poll().await;

    let rewritten = std::fs::read_to_string(&unit).unwrap();
    let script = h.version_dir("3.1.0").join("script.js");
    assert_eq!(
        rewritten,
        format!("[Service]\nExecStart=/usr/bin/node {}\n", script.display())
    );
}

const VERSIONS: [&str; 3] = ["1.0.0", "1.1.0", "2.0.0"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// The current version is always the last one that installed cleanly.
    #[test]
    fn prop_current_is_last_clean_install(
        steps in prop::collection::vec((0..VERSIONS.len(), any::<bool>()), 1..8)
    ) {
        tokio_test::block_on(async {
            let h = TestHarness::setup();
            let mut expected = NO_VERSION.to_string();
            let mut installed = HashSet::new();

            for (idx, good) in steps {
                let version = VERSIONS[idx];
                if good {
                    h.remote().publish(version, version);
                } else {
                    h.remote().publish_with_key(version, version, "wrong");
                }

                let outcome = h.poll().await;
                if version != expected && (good || installed.contains(version)) {
                    expected = version.to_string();
                    installed.insert(version);
                }

                prop_assert_eq!(outcome.active_version(), expected.as_str());
                let current = h
                    .state()
                    .map_or_else(|| NO_VERSION.to_string(), |s| s.current_version);
                prop_assert_eq!(&current, &expected);
                if expected != NO_VERSION {
                    let script = h.script(&expected);
                    prop_assert_eq!(script.as_deref(), Some(expected.as_str()));
                }
            }
            Ok(())
        })?;
    }

    /// A failed request at any point of an upgrade never advances the pointer.
    #[test]
    fn prop_failure_at_any_step_keeps_current(step in 0usize..3) {
        tokio_test::block_on(async {
            let h = TestHarness::setup();
            h.remote().publish("1.0.0", "one");
            h.poll().await;

            h.remote().publish("2.0.0", "two");
            h.remote().fail_nth(step);
            let outcome = h.poll().await;
            prop_assert_eq!(outcome.active_version(), "1.0.0");
            prop_assert_eq!(h.state().unwrap().current_version, "1.0.0");
            let script = h.script("1.0.0");
            prop_assert_eq!(script.as_deref(), Some("one"));

            let outcome = h.poll().await;
            prop_assert_eq!(outcome.active_version(), "2.0.0");
            prop_assert_eq!(h.state(), settled("2.0.0"));
            Ok(())
        })?;
    }
}
