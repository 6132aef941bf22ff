//! Test harness wiring an updater to an in-memory remote.
//!
//! The `TestHarness` owns a temporary install root, a [`FakeRemote`] and the
//! coordinator under test, plus helpers for inspecting what ended up on disk.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use payload_updater::cipher::{self, Cipher, SivCipher};
use payload_updater::config::{PAYLOAD_DOCUMENT, VERSION_DOCUMENT};
use payload_updater::{
    Credential, Error, LocalVersionState, PollOutcome, Result, Transport, UpdateCoordinator,
    UpdaterConfig,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Base URL the harness configures.
pub const BASE_URL: &str = "https://updates.test/agent";

/// Key shared by the harness remote and updater.
pub const KEY: &str = "661588cc19bc2c9d";

/// In-memory stand-in for the update server.
#[derive(Default)]
pub struct FakeRemote {
    files: Mutex<HashMap<String, Bytes>>,
    fetches: Mutex<HashMap<String, usize>>,
    requests: AtomicUsize,
    fail_at: Mutex<Option<usize>>,
    outage: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeRemote {
    /// URL of the version document.
    #[must_use]
    pub fn version_url() -> String {
        format!("{BASE_URL}/{VERSION_DOCUMENT}")
    }

    /// URL of the encrypted payload.
    #[must_use]
    pub fn payload_url() -> String {
        format!("{BASE_URL}/{PAYLOAD_DOCUMENT}")
    }

    /// Publish `version` with `script` sealed under [`KEY`].
    pub fn publish(&self, version: &str, script: &str) {
        self.publish_with_key(version, script, KEY);
    }

    /// Publish `version` with `script` sealed under `key`.
    pub fn publish_with_key(&self, version: &str, script: &str, key: &str) {
        let sealed = cipher::seal(script.as_bytes(), &Credential::new(key)).unwrap();
        let mut files = self.files.lock();
        files.insert(
            Self::version_url(),
            Bytes::from(format!(r#"{{"version":"{version}"}}"#)),
        );
        files.insert(Self::payload_url(), Bytes::from(sealed));
    }

    /// Answer every request with HTTP 500 while `down` is set.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Answer the `n`th request from now (0-based) with HTTP 500.
    pub fn fail_nth(&self, n: usize) {
        *self.fail_at.lock() = Some(self.requests.load(Ordering::SeqCst) + n);
    }

    /// Block every request until [`Self::release`] is called.
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let held requests through.
    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.add_permits(1);
        }
    }

    /// Number of requests made for `url`.
    #[must_use]
    pub fn fetches(&self, url: &str) -> usize {
        self.fetches.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for FakeRemote {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let n = self.requests.fetch_add(1, Ordering::SeqCst);
        *self.fetches.lock().entry(url.to_string()).or_default() += 1;

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
        }

        let injected = *self.fail_at.lock() == Some(n);
        if injected || self.outage.load(Ordering::SeqCst) {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: 500,
            });
        }

        self.files
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Real cipher that counts decryptions.
#[derive(Default)]
pub struct CountingCipher(AtomicUsize);

#[async_trait]
impl Cipher for CountingCipher {
    async fn decrypt_file(&self, src: &Path, dest: &Path, key: &Credential) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        SivCipher.decrypt_file(src, dest, key).await
    }
}

/// An updater under test.
pub struct TestHarness {
    _dir: tempfile::TempDir,
    config: UpdaterConfig,
    remote: Arc<FakeRemote>,
    cipher: Arc<CountingCipher>,
    coordinator: Arc<UpdateCoordinator>,
}

impl TestHarness {
    /// Harness with the default configuration.
    #[must_use]
    pub fn setup() -> Self {
        Self::setup_with(|_| {})
    }

    /// Harness whose configuration is adjusted by `tweak` first.
    #[must_use]
    pub fn setup_with(tweak: impl FnOnce(&mut UpdaterConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = UpdaterConfig {
            base_url: Some(BASE_URL.to_string()),
            decryption_key: Credential::new(KEY),
            install_root: dir.path().join("myscripts"),
            ..UpdaterConfig::default()
        };
        tweak(&mut config);
        std::fs::create_dir_all(&config.install_root).unwrap();

        let remote = Arc::new(FakeRemote::default());
        let cipher = Arc::new(CountingCipher::default());
        let coordinator =
            UpdateCoordinator::from_config(&config, remote.clone(), cipher.clone()).unwrap();

        Self {
            _dir: dir,
            config,
            remote,
            cipher,
            coordinator: Arc::new(coordinator),
        }
    }

    /// Configuration the coordinator was built from.
    #[must_use]
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// The simulated remote.
    #[must_use]
    pub fn remote(&self) -> &Arc<FakeRemote> {
        &self.remote
    }

    /// The coordinator under test.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<UpdateCoordinator> {
        &self.coordinator
    }

    /// Install root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.config.install_root
    }

    /// Directory of `version`.
    #[must_use]
    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.root().join(version)
    }

    /// Run one poll.
    pub async fn poll(&self) -> PollOutcome {
        self.coordinator.poll().await
    }

    /// Persisted state, if any.
    #[must_use]
    pub fn state(&self) -> Option<LocalVersionState> {
        self.coordinator.store().read().ok()
    }

    /// Raw bytes of the state file, if it exists.
    #[must_use]
    pub fn state_bytes(&self) -> Option<Vec<u8>> {
        std::fs::read(self.config.state_path()).ok()
    }

    /// Decrypted payload of `version`, if present.
    #[must_use]
    pub fn script(&self, version: &str) -> Option<String> {
        std::fs::read_to_string(self.version_dir(version).join("script.js")).ok()
    }

    /// Number of decryptions performed so far.
    #[must_use]
    pub fn decryptions(&self) -> usize {
        self.cipher.0.load(Ordering::SeqCst)
    }

    /// Wait until a poll holds the busy guard.
    pub async fn wait_until_busy(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.coordinator.is_busy() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("poll never started");
    }
}
