//! Shared fakes for the integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use mailsync_core::{
    Collaborators, Error, MailSource, MailSourceConfig, MailSourceOptions, MailboxBackend,
    MailboxEntry, MailboxKey, MailboxOpener, MailboxPath, MailboxPolicy, MailboxRegistry,
    MemoryStatusStore, MemoryTagStore, MessageIndex, ProbeState, Protocol, RescanOutcome, Result,
    ScanRequest, SyncSettings,
};

/// What the index saw for one scan.
#[derive(Debug, Clone)]
pub struct ScanRecord {
    pub key: MailboxKey,
    pub path: PathBuf,
    pub session: String,
    pub stop_after: Option<usize>,
    pub apply_tags: Vec<String>,
    pub process_new: bool,
    pub label: Option<String>,
}

/// Index that hands out a fixed number of messages per scan.
#[derive(Default)]
pub struct FakeIndex {
    pub per_scan: usize,
    pub scans: Mutex<Vec<ScanRecord>>,
    pub processed: AtomicUsize,
    pub not_ready: AtomicBool,
    pub missing: Mutex<HashSet<MailboxKey>>,
    pub broken: AtomicBool,
    pub panics: AtomicBool,
    /// Raise the interrupt during the n-th scan (1-based); 0 disables.
    pub interrupt_at: AtomicUsize,
    pub delay: Mutex<Option<Duration>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub source: OnceLock<MailSource>,
    pub reenter: Mutex<Option<MailboxKey>>,
    pub reentry_outcomes: Mutex<Vec<RescanOutcome>>,
}

impl FakeIndex {
    pub fn new(per_scan: usize) -> Self {
        Self {
            per_scan,
            ..Self::default()
        }
    }

    pub fn scan_count(&self) -> usize {
        self.scans.lock().unwrap().len()
    }

    pub fn scanned_keys(&self) -> Vec<MailboxKey> {
        let mut keys: Vec<_> = self
            .scans
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl MessageIndex for FakeIndex {
    fn is_ready(&self) -> bool {
        !self.not_ready.load(Ordering::SeqCst)
    }

    async fn scan(&self, request: ScanRequest) -> Result<usize> {
        let label = self.source.get().map(MailSource::state_label);
        let nth = {
            let mut scans = self.scans.lock().unwrap();
            scans.push(ScanRecord {
                key: request.key.clone(),
                path: request.path.clone(),
                session: request.session.name.clone(),
                stop_after: request.stop_after,
                apply_tags: request.apply_tags.clone(),
                process_new: request.process_new.is_some(),
                label,
            });
            scans.len()
        };

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reenter = self.reenter.lock().unwrap().clone();
        if let (Some(key), Some(source)) = (reenter, self.source.get()) {
            let outcome = source.rescan_mailbox(&key, None).await?;
            self.reentry_outcomes.lock().unwrap().push(outcome);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.interrupt_at.load(Ordering::SeqCst) == nth {
            request.interrupt.raise("Test stop");
        }
        if self.missing.lock().unwrap().contains(&request.key) {
            return Err(Error::NoSuchMailbox(request.key));
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Index("corrupt posting list".into()));
        }
        assert!(!self.panics.load(Ordering::SeqCst), "index exploded");

        let count = request
            .stop_after
            .map_or(self.per_scan, |limit| limit.min(self.per_scan));
        self.processed.fetch_add(count, Ordering::SeqCst);
        Ok(count)
    }
}

/// Backend whose change probe answers whatever the test says.
#[derive(Debug)]
pub struct FakeBackend {
    pub changed: AtomicBool,
    pub probes: AtomicUsize,
    pub marks: AtomicUsize,
}

impl FakeBackend {
    pub fn new(changed: bool) -> Self {
        Self {
            changed: AtomicBool::new(changed),
            probes: AtomicUsize::new(0),
            marks: AtomicUsize::new(0),
        }
    }
}

impl MailboxOpener for FakeBackend {}

#[async_trait]
impl MailboxBackend for FakeBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Mbox
    }

    async fn open(&self) -> Result<bool> {
        Ok(true)
    }

    async fn has_changed(
        &self,
        _mailbox: &MailboxEntry,
        _path: &Path,
        _probe: &mut ProbeState,
    ) -> Result<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.changed.load(Ordering::SeqCst))
    }

    async fn mark_rescanned(&self, _mailbox: &MailboxEntry, _probe: &ProbeState) {
        self.marks.fetch_add(1, Ordering::SeqCst);
    }
}

/// Send engine logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A worker wired to in-memory collaborators.
pub struct Harness {
    pub source: MailSource,
    pub index: Arc<FakeIndex>,
    pub tags: Arc<MemoryTagStore>,
    pub statuses: Arc<MemoryStatusStore>,
    pub registry: Arc<MailboxRegistry>,
    pub shutdown: CancellationToken,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new(
        config: MailSourceConfig,
        backend: Arc<dyn MailboxBackend>,
        index: FakeIndex,
        options: MailSourceOptions,
    ) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(index);
        let tags = Arc::new(MemoryTagStore::new());
        let statuses = Arc::new(MemoryStatusStore::new());
        let registry = Arc::new(MailboxRegistry::new(dir.path().join("mailstore")));
        let shutdown = CancellationToken::new();

        let collaborators = Collaborators {
            index: index.clone(),
            tags: tags.clone(),
            statuses: statuses.clone(),
            registry: registry.clone(),
        };
        let source = MailSource::new(
            Arc::new(RwLock::new(config)),
            backend,
            collaborators,
            options,
            &shutdown,
        )
        .await;
        let _ = index.source.set(source.clone());

        Self {
            source,
            index,
            tags,
            statuses,
            registry,
            shutdown,
            dir,
        }
    }

    /// Harness with a [`FakeBackend`] and default options.
    pub async fn fake(config: MailSourceConfig, index: FakeIndex) -> (Self, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::new(true));
        let harness = Self::new(config, backend.clone(), index, options()).await;
        (harness, backend)
    }

    pub async fn message(&self) -> String {
        self.source.status().await.message
    }
}

/// Options without jitter and with a fixed seed.
pub fn options() -> MailSourceOptions {
    MailSourceOptions {
        settings: SyncSettings {
            jitter: Duration::ZERO,
            ..SyncSettings::default()
        },
        rng_seed: Some(7),
        ..MailSourceOptions::default()
    }
}

pub fn entry(index: usize, policy: MailboxPolicy) -> MailboxEntry {
    MailboxEntry::new(
        MailboxKey::from_index(index),
        MailboxPath::Direct(PathBuf::from(format!("/var/mail/box{index}"))),
    )
    .with_policy(policy)
}

/// Config with `n` readable mailboxes.
pub fn config_with(n: usize) -> MailSourceConfig {
    let mut config = MailSourceConfig::new("local", Protocol::Mbox);
    for i in 0..n {
        config.insert_mailbox(entry(i, MailboxPolicy::Read));
    }
    config
}

/// Write a one-message mbox file.
pub fn write_mbox(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(
        path,
        "From bre@example.com Sat Jan  3 01:05:34 1996\nSubject: hi\n\nhello\n",
    )
    .unwrap();
}
