//! The mail source worker.
//!
//! A [`MailSource`] owns one background task that periodically asks the
//! message index to rescan the source's mailboxes, discovers new ones and
//! keeps a [`WorkerStatus`] record up to date. Every mutating operation runs
//! under the worker's [`ExclusiveState`]; the long index scan itself runs
//! with the lock released.
//!
//! ```text
//!   start()                     quit()
//!     |                           |
//!     v                           v
//!   Idle --sleep/wake--> Running --cancel--> Shutdown
//!     ^                     |
//!     +------cycle done-----+
//! ```

mod cycle;
mod discovery;
mod exclusive;
mod interrupt;
mod rendezvous;
mod scheduler;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use exclusive::{ExclusiveSection, ExclusiveState, LabelScope};
pub use interrupt::InterruptSignal;

use crate::Result;
use crate::backend::{self, MailboxBackend, RemoteFolderProbe};
use crate::config::{MailboxEntry, MailboxKey, MailboxRegistry, SharedConfig, SourceId, SyncSettings};
use crate::index::{MessageIndex, ProcessNew, Session};
use crate::status::{StatusStore, WorkerStatus};
use crate::tags::TagStore;
use rendezvous::RescanQueue;

const SHUT_DOWN: &str = "Shut down";
const ABORTED: &str = "Aborted";

/// Result of rescanning one mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescanOutcome {
    /// The index processed this many messages.
    Processed(usize),
    /// The mailbox could not be rescanned right now.
    Unavailable,
}

/// Services a worker depends on.
#[derive(Clone)]
pub struct Collaborators {
    /// Message index doing the actual scans.
    pub index: Arc<dyn MessageIndex>,
    /// Tag storage.
    pub tags: Arc<dyn TagStore>,
    /// Status record storage.
    pub statuses: Arc<dyn StatusStore>,
    /// Application-wide mailbox registry.
    pub registry: Arc<MailboxRegistry>,
}

/// Optional knobs for a worker.
#[derive(Clone, Default)]
pub struct MailSourceOptions {
    /// Engine tuning.
    pub settings: SyncSettings,
    /// Background session; defaults to one named after the source.
    pub session: Option<Session>,
    /// Replaces [`UnreadTagger`](crate::index::UnreadTagger) for mailboxes
    /// with `process_new` set.
    pub process_new: Option<Arc<dyn ProcessNew>>,
    /// Seed for probe selection and jitter, for reproducible runs.
    pub rng_seed: Option<u64>,
}

pub(crate) struct Inner {
    source_id: SourceId,
    config: SharedConfig,
    settings: SyncSettings,
    backend: Arc<dyn MailboxBackend>,
    index: Arc<dyn MessageIndex>,
    tags: Arc<dyn TagStore>,
    statuses: Arc<dyn StatusStore>,
    registry: Arc<MailboxRegistry>,
    process_new: Option<Arc<dyn ProcessNew>>,
    exclusive: ExclusiveState,
    rescanning: AtomicBool,
    interrupt: InterruptSignal,
    cancel: CancellationToken,
    wake: Notify,
    sleeping_until: Mutex<Option<Instant>>,
    rescans: RescanQueue,
    status: tokio::sync::Mutex<WorkerStatus>,
    default_session: Arc<Session>,
    session: Mutex<Arc<Session>>,
    last_rescan_count: AtomicUsize,
    last_saved: Mutex<Instant>,
    rng: Mutex<StdRng>,
}

/// Handle to a mail source worker. Clones share the same worker.
#[derive(Clone)]
pub struct MailSource {
    inner: Arc<Inner>,
}

impl MailSource {
    /// Create a worker for `config`, using `backend` to probe mailboxes.
    ///
    /// The worker stops when `shutdown` is cancelled or [`quit`](Self::quit)
    /// is called.
    pub async fn new(
        config: SharedConfig,
        backend: Arc<dyn MailboxBackend>,
        collaborators: Collaborators,
        options: MailSourceOptions,
        shutdown: &CancellationToken,
    ) -> Self {
        let source_id = config.read().await.id.clone();
        let default_session = Arc::new(
            options
                .session
                .unwrap_or_else(|| Session::background(source_id.0.clone())),
        );
        let rng = options
            .rng_seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        Self {
            inner: Arc::new(Inner {
                status: tokio::sync::Mutex::new(WorkerStatus::starting(source_id.clone())),
                source_id,
                config,
                settings: options.settings,
                backend,
                index: collaborators.index,
                tags: collaborators.tags,
                statuses: collaborators.statuses,
                registry: collaborators.registry,
                process_new: options.process_new,
                exclusive: ExclusiveState::new(),
                rescanning: AtomicBool::new(false),
                interrupt: InterruptSignal::new(),
                cancel: shutdown.child_token(),
                wake: Notify::new(),
                sleeping_until: Mutex::new(None),
                rescans: RescanQueue::default(),
                session: Mutex::new(default_session.clone()),
                default_session,
                last_rescan_count: AtomicUsize::new(0),
                last_saved: Mutex::new(Instant::now()),
                rng: Mutex::new(rng),
            }),
        }
    }

    /// Create a worker with the backend matching the configured protocol.
    ///
    /// # Errors
    ///
    /// Returns an error if no backend can serve the protocol.
    pub async fn for_protocol(
        config: SharedConfig,
        remote: Option<Arc<dyn RemoteFolderProbe>>,
        collaborators: Collaborators,
        options: MailSourceOptions,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        let protocol = config.read().await.protocol;
        let backend = backend::for_protocol(protocol, remote)?;
        Ok(Self::new(config, backend, collaborators, options, shutdown).await)
    }

    /// Spawn the background loop.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run().await })
    }

    /// Ask the worker to stop. The loop exits after the current step.
    pub fn quit(&self) {
        self.inner.interrupt.raise(SHUT_DOWN);
        self.inner.cancel.cancel();
        self.inner.wake.notify_one();
    }

    /// Cut the current (or next) sleep short.
    pub fn wake_up(&self) {
        self.inner.wake.notify_one();
    }

    /// Stop the running rescan early. An empty reason means "Aborted".
    ///
    /// Returns whether a rescan was in progress.
    pub fn interrupt_rescan(&self, reason: &str) -> bool {
        let reason = if reason.is_empty() { ABORTED } else { reason };
        self.inner.interrupt.raise(reason);
        self.inner.rescanning.load(Ordering::Acquire)
    }

    /// Wake the worker and wait until it has run a full cycle.
    ///
    /// `session`, if given, replaces the worker's own for that cycle.
    /// Returns the number of mailboxes the most recent cycle rescanned. If
    /// the worker shuts down first, returns the previous count.
    pub async fn rescan_now(&self, session: Option<Session>) -> usize {
        self.rescan_now_with(session, || async {}).await
    }

    /// Like [`rescan_now`](Self::rescan_now), running `on_started` once the
    /// worker has picked up the request.
    ///
    /// Dropping the returned future before the cycle finishes interrupts the
    /// rescan with reason "User aborted".
    pub async fn rescan_now_with<F, Fut>(&self, session: Option<Session>, on_started: F) -> usize
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        if self.inner.cancel.is_cancelled() {
            return self.last_rescan_count();
        }
        let (request, ticket) = rendezvous::request(session.map(Arc::new));
        self.inner.rescans.push(request);
        self.wake_up();
        let completed = ticket
            .wait(&self.inner.cancel, &self.inner.interrupt, on_started)
            .await;
        if !completed {
            debug!(source = %self.inner.source_id, "Gave up waiting for rescan");
        }
        self.last_rescan_count()
    }

    /// Load or resume the status record.
    ///
    /// # Errors
    ///
    /// Returns an error if the status store fails.
    pub async fn load_state(&self) -> Result<()> {
        let _section = self.inner.exclusive.enter("LoadState").await;
        self.inner.load_state_locked().await
    }

    /// Open the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails hard.
    pub async fn open(&self) -> Result<bool> {
        let _section = self.inner.exclusive.enter("Open").await;
        self.inner.backend.open().await
    }

    /// Run one sync cycle now, returning the number of mailboxes rescanned.
    ///
    /// # Errors
    ///
    /// Returns an error for failures that are not confined to one mailbox.
    pub async fn sync_mail(&self) -> Result<usize> {
        let mut section = self.inner.exclusive.enter("SyncMail").await;
        self.inner.sync_mail_locked(&mut section).await
    }

    /// Rescan a single mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchMailbox`](crate::Error::NoSuchMailbox) for an
    /// untracked key, or whatever the index reports.
    pub async fn rescan_mailbox(
        &self,
        key: &MailboxKey,
        stop_after: Option<usize>,
    ) -> Result<RescanOutcome> {
        let mut section = self.inner.exclusive.enter("RescanMailbox").await;
        self.inner
            .rescan_mailbox_locked(&mut section, key, stop_after)
            .await
    }

    /// Start tracking a registered mailbox, or refresh its entry.
    ///
    /// # Errors
    ///
    /// Returns an error if tag or mailstore creation fails.
    pub async fn take_over_mailbox(&self, key: &MailboxKey) -> Result<MailboxEntry> {
        let _section = self.inner.exclusive.enter("TakeOverMailbox").await;
        self.inner.take_over_mailbox_locked(key).await
    }

    /// Crawl the configured discovery paths.
    ///
    /// Returns `false` if the crawl gave up because it found too many paths.
    ///
    /// # Errors
    ///
    /// Returns an error if taking over a found mailbox fails.
    pub async fn discover_mailboxes(&self) -> Result<bool> {
        let _section = self.inner.exclusive.enter("DiscoverMailboxes").await;
        let paths = self.inner.config.read().await.discovery.paths.clone();
        self.inner.discover_mailboxes_locked(&paths).await
    }

    /// Snapshot of the status record.
    pub async fn status(&self) -> WorkerStatus {
        self.inner.status.lock().await.clone()
    }

    /// What the worker is doing right now.
    #[must_use]
    pub fn state_label(&self) -> String {
        self.inner.exclusive.label()
    }

    /// Mailboxes rescanned by the most recent cycle.
    #[must_use]
    pub fn last_rescan_count(&self) -> usize {
        self.inner.last_rescan_count.load(Ordering::Acquire)
    }

    /// The configuration the worker reads and updates.
    #[must_use]
    pub fn shared_config(&self) -> SharedConfig {
        self.inner.config.clone()
    }

    /// Session scans currently run under.
    #[must_use]
    pub fn session(&self) -> Arc<Session> {
        self.inner.session()
    }

    /// Signal passed to the index with every scan.
    #[must_use]
    pub fn interrupt_signal(&self) -> InterruptSignal {
        self.inner.interrupt.clone()
    }
}

impl fmt::Display for MailSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.inner.source_id, self.state_label())?;
        let until = *self
            .inner
            .sleeping_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(until) = until {
            let left = until.saturating_duration_since(Instant::now());
            write!(f, " ({}s)", left.as_secs())?;
        }
        Ok(())
    }
}

impl fmt::Debug for MailSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailSource")
            .field("source_id", &self.inner.source_id)
            .field("protocol", &self.inner.backend.protocol())
            .field("state", &self.state_label())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn session(&self) -> Arc<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, session: Arc<Session>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    /// Replace the status message and persist the record.
    async fn log_status(&self, message: impl Into<String>) {
        let snapshot = {
            let mut status = self.status.lock().await;
            status.set_message(message);
            if self.settings.debug {
                debug!(source = %self.source_id, "{}", status.message);
            }
            status.clone()
        };
        self.persist(&snapshot).await;
    }

    async fn persist(&self, snapshot: &WorkerStatus) {
        match self.statuses.persist(snapshot).await {
            Ok(()) => {
                *self.last_saved.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
            }
            Err(e) => warn!(source = %self.source_id, "Failed to save status: {e}"),
        }
    }

    async fn save_state(&self) {
        let snapshot = self.status.lock().await.clone();
        self.persist(&snapshot).await;
    }

    async fn load_state_locked(&self) -> Result<()> {
        if let Some(previous) = self.statuses.load_incomplete(&self.source_id).await? {
            debug!(source = %self.source_id, "Resuming status: {}", previous.message);
            *self.status.lock().await = previous;
        } else {
            let snapshot = self.status.lock().await.clone();
            self.statuses.persist(&snapshot).await?;
        }
        Ok(())
    }
}
