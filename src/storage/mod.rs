//! Storage module for persisting queue data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Queue items and their status transitions
//! - Collector cursors
//! - The action audit log

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::ItemStatus;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage handle shared between a collector, a worker and status queries
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Opens (or creates) the database and wraps it for sharing
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
pub fn open_shared(path: &Path) -> StorageResult<SharedStorage> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Locks a shared storage handle
///
/// A poisoned lock means a thread panicked mid-operation; SQLite rolled back
/// whatever it was doing, but the error is still surfaced rather than ignored.
pub fn lock(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage.lock().map_err(|_| StorageError::Poisoned)
}

/// A queue item as stored in the database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItemRecord {
    pub id: i64,
    pub queue: String,
    pub key: String,
    pub source: String,
    pub ordering_ts: i64,
    pub status: ItemStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub remote_id: Option<String>,
    pub claimed: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Descriptive fields attached to an item by its collector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
}

/// Result of upserting one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The key was new
    Inserted,
    /// A pending item's ordering timestamp advanced
    Updated,
    /// Nothing that affects processing changed
    Unchanged,
}

/// Outcome recorded in the action log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Sent,
    Failed,
}

impl ActionOutcome {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One entry of the action audit log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionLogRecord {
    pub id: i64,
    pub queue: String,
    pub key: String,
    pub outcome: ActionOutcome,
    pub remote_id: Option<String>,
    pub content: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
}

/// Item counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub done: u64,
    pub failed: u64,
    pub total: u64,
}
