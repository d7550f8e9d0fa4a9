//! Store configuration.

use std::path::PathBuf;

/// SQLite store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file, or `:memory:`
    pub path: PathBuf,
    /// Enable WAL journal mode
    pub wal_mode: bool,
    /// Busy timeout in milliseconds
    pub busy_timeout_ms: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("trapdata.db"),
            wal_mode: true,
            busy_timeout_ms: 10_000,
        }
    }
}

impl StoreConfig {
    /// In-memory database, used by tests.
    pub fn memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            wal_mode: false,
            ..Default::default()
        }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            path: std::env::var("TRAPDATA_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("trapdata.db")),
            wal_mode: std::env::var("TRAPDATA_DB_WAL")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(true),
            busy_timeout_ms: std::env::var("TRAPDATA_DB_BUSY_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path.to_str() == Some(":memory:")
    }
}
