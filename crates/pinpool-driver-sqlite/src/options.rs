//! SQLite connection options and one-time pragma setup

use std::path::PathBuf;
use std::time::Duration;

use pinpool_core::{PoolError, Result};
use serde::{Deserialize, Serialize};

/// Default busy timeout; lets concurrent writers on sibling connections wait
/// for the WAL write lock instead of failing with SQLITE_BUSY.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default memory-map size hint (256 MiB).
pub const DEFAULT_MMAP_SIZE: i64 = 268_435_456;

/// Options for opening SQLite connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteOptions {
    /// File path, `:memory:`, or a `file:` URI
    path: String,
    /// How long a statement waits on a locked database before failing
    busy_timeout_ms: u64,
    /// Memory-map size hint passed to `PRAGMA mmap_size`
    mmap_size: i64,
}

impl SqliteOptions {
    /// Create options for the given database location
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            mmap_size: DEFAULT_MMAP_SIZE,
        }
    }

    /// Options for a private in-memory database
    ///
    /// Each connection opened with these options sees its own, empty database.
    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    /// Set the busy timeout in milliseconds
    pub fn with_busy_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.busy_timeout_ms = timeout_ms;
        self
    }

    /// Set the memory-map size hint in bytes (0 disables memory mapping)
    pub fn with_mmap_size(mut self, bytes: i64) -> Self {
        self.mmap_size = bytes;
        self
    }

    /// The configured database location, unexpanded
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn mmap_size(&self) -> i64 {
        self.mmap_size
    }

    pub fn is_memory(&self) -> bool {
        self.path == ":memory:"
    }

    /// Pragmas issued once on every new connection, in order.
    ///
    /// Foreign-key enforcement, write-ahead logging, relaxed sync, in-memory
    /// temp storage and the mmap hint.
    pub fn init_pragmas(&self) -> Vec<(&'static str, String)> {
        vec![
            ("foreign_keys", "ON".to_string()),
            ("journal_mode", "WAL".to_string()),
            ("synchronous", "NORMAL".to_string()),
            ("temp_store", "MEMORY".to_string()),
            ("mmap_size", self.mmap_size.to_string()),
        ]
    }

    /// Resolve the location to something `rusqlite` can open.
    ///
    /// Expands `~/` to the home directory and makes relative paths absolute.
    /// `:memory:` and `file:` URIs are passed through untouched.
    pub fn resolved_path(&self) -> Result<String> {
        let path = self.path.as_str();
        if path == ":memory:" || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            match std::env::var_os("HOME") {
                Some(home) => PathBuf::from(home).join(rest),
                None => {
                    return Err(PoolError::Configuration(
                        "Unable to determine HOME directory".into(),
                    ));
                }
            }
        } else if path.starts_with('~') {
            return Err(PoolError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            PathBuf::from(path)
        };

        let absolute = if expanded.is_relative() {
            std::env::current_dir()?.join(expanded)
        } else {
            expanded
        };

        Ok(absolute.to_string_lossy().to_string())
    }
}
