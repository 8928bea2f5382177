//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Feedpace database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Work items, one row per (queue, key)
CREATE TABLE IF NOT EXISTS queue_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    key TEXT NOT NULL,
    source TEXT NOT NULL,
    ordering_ts INTEGER NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    title TEXT,
    author TEXT,
    url TEXT,
    remote_id TEXT,
    claimed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(queue, key)
);

CREATE INDEX IF NOT EXISTS idx_queue_items_claim
    ON queue_items(queue, status, ordering_ts DESC, id);

-- Per-source pagination position
CREATE TABLE IF NOT EXISTS collector_cursors (
    source TEXT PRIMARY KEY,
    cursor TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Audit trail of attempted actions
CREATE TABLE IF NOT EXISTS action_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    key TEXT NOT NULL,
    outcome TEXT NOT NULL,
    remote_id TEXT,
    content TEXT,
    error TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_action_log_queue ON action_log(queue, id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
