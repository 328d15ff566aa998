//! Mail source configuration types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const KEY_WIDTH: usize = 4;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Stable identifier of a mailbox in the global registry.
///
/// Keys are the registry index rendered in base 36 and zero-padded to four
/// characters (`0`, `a` and `36` become `0000`, `000a` and `0010`). Indexes
/// past `zzzz` get a wider key rather than wrapping around.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MailboxKey(String);

impl MailboxKey {
    /// Create a key from a registry index.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        let mut digits = Vec::new();
        let mut n = index;
        loop {
            digits.push(char::from(BASE36[n % 36]));
            n /= 36;
            if n == 0 {
                break;
            }
        }
        let digits: String = digits.into_iter().rev().collect();
        Self(format!("{digits:0>KEY_WIDTH$}"))
    }

    /// The registry index this key refers to.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        usize::from_str_radix(&self.0, 36).ok()
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MailboxKey {
    type Err = Error;

    /// Parse a key in any case and padding, e.g. `A`, `000a` or `0010`.
    fn from_str(raw: &str) -> Result<Self> {
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Config(format!("invalid mailbox key {raw:?}")));
        }
        usize::from_str_radix(raw, 36)
            .map(Self::from_index)
            .map_err(|_| Error::Config(format!("mailbox key out of range: {raw}")))
    }
}

impl TryFrom<String> for MailboxKey {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<MailboxKey> for String {
    fn from(key: MailboxKey) -> Self {
        key.0
    }
}

impl fmt::Display for MailboxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a configured mail source (one per account).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    /// Create a new source ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Protocol spoken by a mail source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Local Unix mbox files.
    #[default]
    Mbox,
    /// Local maildir folders.
    Maildir,
    /// Remote IMAP mailboxes.
    Imap,
    /// Remote IMAP mailboxes over implicit TLS.
    ImapSsl,
}

impl Protocol {
    /// Protocol name as used in configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mbox => "mbox",
            Self::Maildir => "maildir",
            Self::Imap => "imap",
            Self::ImapSsl => "imap_ssl",
        }
    }

    /// Whether mailboxes of this protocol live on a remote server.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Imap | Self::ImapSsl)
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mbox" => Ok(Self::Mbox),
            "maildir" => Ok(Self::Maildir),
            "imap" => Ok(Self::Imap),
            "imap_ssl" => Ok(Self::ImapSsl),
            other => Err(Error::UnknownProtocol(other.to_string())),
        }
    }
}

/// What the engine does with a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxPolicy {
    /// Tracked but never scanned.
    Ignore,
    /// Newly discovered, waiting for the user to classify it.
    #[default]
    Unknown,
    /// Index new mail, leave the source untouched.
    Read,
    /// Index new mail and move it into local storage.
    Move,
    /// Keep the local copy and the source in sync.
    Sync,
    /// Use the source-wide default.
    Inherit,
}

impl MailboxPolicy {
    /// Whether mailboxes with this policy may be scanned for content.
    #[must_use]
    pub const fn is_scannable(&self) -> bool {
        !matches!(self, Self::Ignore | Self::Unknown)
    }
}

/// Location of a mailbox.
///
/// Serialized as a plain string; `@<key>` refers to an entry of the global
/// mailbox registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MailboxPath {
    /// A literal filesystem path or remote folder name.
    Direct(PathBuf),
    /// An indirect reference into the mailbox registry.
    Registry(MailboxKey),
}

impl MailboxPath {
    /// Whether the path points nowhere.
    #[must_use]
    pub fn is_null(path: &Path) -> bool {
        path.as_os_str().is_empty() || path == Path::new("/dev/null")
    }
}

impl TryFrom<String> for MailboxPath {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        match raw.strip_prefix('@') {
            Some(key) => Ok(Self::Registry(key.parse()?)),
            None => Ok(Self::Direct(PathBuf::from(raw))),
        }
    }
}

impl From<MailboxPath> for String {
    fn from(path: MailboxPath) -> Self {
        match path {
            MailboxPath::Direct(p) => p.to_string_lossy().into_owned(),
            MailboxPath::Registry(key) => format!("@{key}"),
        }
    }
}

impl fmt::Display for MailboxPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(p) => write!(f, "{}", p.display()),
            Self::Registry(key) => write!(f, "@{key}"),
        }
    }
}

/// One tracked mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxEntry {
    /// Stable key.
    pub key: MailboxKey,
    /// Where the mailbox lives.
    pub path: MailboxPath,
    /// Scanning policy.
    #[serde(default)]
    pub policy: MailboxPolicy,
    /// Whether new messages go through the process-new hook.
    #[serde(default)]
    pub process_new: bool,
    /// Tags applied to every message found in this mailbox.
    #[serde(default)]
    pub apply_tags: Vec<String>,
    /// Tag (ID, or name until created) representing this mailbox.
    #[serde(default)]
    pub primary_tag: Option<String>,
    /// Local copy of a remote or moved mailbox.
    #[serde(default)]
    pub local: Option<PathBuf>,
}

impl MailboxEntry {
    /// Create an entry with default policy pointing at `path`.
    #[must_use]
    pub fn new(key: MailboxKey, path: MailboxPath) -> Self {
        Self {
            key,
            path,
            policy: MailboxPolicy::default(),
            process_new: false,
            apply_tags: Vec::new(),
            primary_tag: None,
            local: None,
        }
    }

    /// Set the policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: MailboxPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Tags to apply when scanning: explicit tags plus the primary tag.
    #[must_use]
    pub fn effective_tags(&self) -> Vec<String> {
        let mut tags = self.apply_tags.clone();
        if let Some(primary) = &self.primary_tag {
            tags.push(primary.clone());
        }
        tags
    }
}

/// Defaults applied to newly discovered mailboxes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Root paths searched for new mailboxes.
    pub paths: Vec<String>,
    /// Policy given to discovered mailboxes.
    pub policy: MailboxPolicy,
    /// Process-new flag given to discovered mailboxes.
    pub process_new: bool,
    /// Tags applied to messages of discovered mailboxes.
    pub apply_tags: Vec<String>,
    /// Create a tag named after each discovered mailbox.
    pub create_tag: bool,
    /// Keep a local copy of each discovered mailbox.
    pub local_copy: bool,
}

fn default_interval_secs() -> u64 {
    300
}

/// Per-account mail source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailSourceConfig {
    /// Unique identifier.
    pub id: SourceId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Backend protocol.
    #[serde(default)]
    pub protocol: Protocol,
    /// Polling interval in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Tracked mailboxes.
    #[serde(default)]
    pub mailboxes: BTreeMap<MailboxKey, MailboxEntry>,
}

impl MailSourceConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new(id: impl Into<String>, protocol: Protocol) -> Self {
        let id = SourceId::new(id);
        Self {
            name: id.0.clone(),
            id,
            protocol,
            interval_secs: default_interval_secs(),
            discovery: DiscoveryConfig::default(),
            mailboxes: BTreeMap::new(),
        }
    }

    /// Parse a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.id.0.is_empty() {
            return Err(Error::Config("mail source id is empty".to_string()));
        }
        Ok(config)
    }

    /// Polling interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Add or replace a tracked mailbox.
    pub fn insert_mailbox(&mut self, entry: MailboxEntry) {
        self.mailboxes.insert(entry.key.clone(), entry);
    }

    /// Look up a tracked mailbox.
    #[must_use]
    pub fn mailbox(&self, key: &MailboxKey) -> Option<&MailboxEntry> {
        self.mailboxes.get(key)
    }
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Upper bound of the random delay added to every sleep.
    pub jitter: Duration,
    /// How often the status record is saved even if nothing changed.
    pub save_state_interval: Duration,
    /// Pause after an internal error.
    pub internal_error_sleep: Duration,
    /// Maximum number of messages indexed per cycle.
    pub rescan_batch_size: usize,
    /// Discovery gives up once this many paths are queued.
    pub max_discovery_paths: usize,
    /// Unchanged mailboxes are still probed one time in this many.
    pub forced_probe_odds: u32,
    /// Debug mode: shorter sleeps, smaller batches, verbose status.
    pub debug: bool,
}

impl SyncSettings {
    /// Default jitter, to tame thundering herds.
    pub const DEFAULT_JITTER: Duration = Duration::from_secs(15);
    /// Default interval between status saves.
    pub const SAVE_STATE_INTERVAL: Duration = Duration::from_secs(3600);
    /// Default pause after an internal error.
    pub const INTERNAL_ERROR_SLEEP: Duration = Duration::from_secs(900);
    /// Default per-cycle message budget.
    pub const RESCAN_BATCH_SIZE: usize = 2500;
    /// Default discovery ceiling.
    pub const MAX_PATHS: usize = 50_000;
    /// Default forced-probe odds.
    pub const FORCED_PROBE_ODDS: u32 = 20;

    /// Message budget for one cycle.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        if self.debug {
            self.rescan_batch_size / 10
        } else {
            self.rescan_batch_size
        }
    }

    /// Scale a sleep for the current mode.
    #[must_use]
    pub fn scale_sleep(&self, duration: Duration) -> Duration {
        if self.debug { duration / 10 } else { duration }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            jitter: Self::DEFAULT_JITTER,
            save_state_interval: Self::SAVE_STATE_INTERVAL,
            internal_error_sleep: Self::INTERNAL_ERROR_SLEEP,
            rescan_batch_size: Self::RESCAN_BATCH_SIZE,
            max_discovery_paths: Self::MAX_PATHS,
            forced_probe_odds: Self::FORCED_PROBE_ODDS,
            debug: false,
        }
    }
}
