//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default number of open cursors kept before the least recently used one is evicted.
pub const DEFAULT_CURSOR_CAPACITY: usize = 64;

/// Default capacity of the connection's prepared-statement cache.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 32;

/// SQLite journal mode for file-backed stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
    Memory,
}

impl JournalMode {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
            JournalMode::Memory => "MEMORY",
        }
    }
}

/// Controls when SQLite calls `fsync` on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Fsync on every commit (default). Maximum durability.
    #[default]
    Full,
    /// Fsync at checkpoints only. Safe with WAL, may lose the last commits on power loss.
    Normal,
    /// Skip fsync entirely. Useful for bulk loads and tests.
    Off,
}

impl SyncMode {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            SyncMode::Full => "FULL",
            SyncMode::Normal => "NORMAL",
            SyncMode::Off => "OFF",
        }
    }
}

/// Options for opening a [`SoupStore`](crate::api::SoupStore).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` opens a private in-memory store.
    pub path: Option<PathBuf>,
    pub journal_mode: JournalMode,
    pub sync_mode: SyncMode,
    /// Maximum number of registered page cursors.
    pub cursor_capacity: usize,
    pub statement_cache_capacity: usize,
    /// How long a blocked statement waits for a competing lock before failing.
    pub busy_timeout_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            cursor_capacity: DEFAULT_CURSOR_CAPACITY,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
            busy_timeout_ms: None,
        }
    }
}

impl StoreConfig {
    /// Config for a file-backed store at `path` with all other options defaulted.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn cursor_capacity(mut self, capacity: usize) -> Self {
        self.cursor_capacity = capacity;
        self
    }

    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub(crate) fn busy_timeout_duration(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }
}
