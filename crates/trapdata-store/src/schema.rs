//! Schema management and migrations.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations.
pub(crate) fn apply_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version = current_version(conn)?;
    debug!(current_version, target_version = SCHEMA_VERSION, "Checking migrations");

    if current_version < 1 {
        info!(from = current_version, to = SCHEMA_VERSION, "Applying schema migrations");
        conn.execute_batch(SCHEMA_V1)
            .map_err(|e| StoreError::Schema(format!("Failed to apply v1 schema: {}", e)))?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])?;
        info!("Migration v1 applied successfully");
    }

    if current_version < 2 {
        conn.execute_batch(SCHEMA_V2)
            .map_err(|e| StoreError::Schema(format!("Failed to apply v2 schema: {}", e)))?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [2])?;
        info!("Migration v2 applied successfully");
    }

    Ok(())
}

fn current_version(conn: &Connection) -> StoreResult<i32> {
    let version: Option<i32> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS monitoring_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    base_directory TEXT NOT NULL,
    day TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (base_directory, day)
);

CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES monitoring_sessions(id),
    path TEXT NOT NULL UNIQUE,
    captured_at TEXT NOT NULL,
    queued_at TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'done', 'failed')),
    processed_at TEXT,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_images_session_status ON images(session_id, status);

-- AUTOINCREMENT keeps ids monotonic across clears so id order stays creation order.
CREATE TABLE IF NOT EXISTS detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    image_id INTEGER NOT NULL REFERENCES images(id) ON DELETE CASCADE,
    x1 REAL NOT NULL,
    y1 REAL NOT NULL,
    x2 REAL NOT NULL,
    y2 REAL NOT NULL,
    detection_score REAL,
    binary_label TEXT,
    binary_score REAL,
    binary_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (binary_status IN ('pending', 'done', 'failed')),
    specific_label TEXT,
    specific_score REAL,
    specific_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (specific_status IN ('pending', 'done', 'failed')),
    cropped_path TEXT,
    track_id TEXT,
    last_error TEXT,
    CHECK (specific_label IS NULL OR binary_label IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_detections_image ON detections(image_id);
CREATE INDEX IF NOT EXISTS idx_detections_binary_status ON detections(binary_status);
CREATE INDEX IF NOT EXISTS idx_detections_specific_status ON detections(specific_status);
"#;

// Single-row table: at most one run lock per store.
const SCHEMA_V2: &str = r#"
CREATE TABLE IF NOT EXISTS run_lock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    holder TEXT NOT NULL,
    purpose TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_images_queue ON images(status, queued_at);
"#;
