//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::ItemStatus;
use crate::storage::{
    ActionLogRecord, ActionOutcome, ItemMetadata, QueueItemRecord, QueueStats, UpsertOutcome,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Item '{key}' not found in queue '{queue}'")]
    ItemNotFound { queue: String, key: String },

    #[error("Invalid status transition for '{key}': {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every mutating operation runs in its own transaction. Queue-scoped methods
/// take the queue name so one database can hold several independent queues.
pub trait Storage {
    // ===== Queue Items =====

    /// Inserts a new pending item or refreshes an existing one
    ///
    /// An existing item keeps its status. Its `ordering_ts` becomes the maximum
    /// of the stored and new values and missing metadata is filled in.
    ///
    /// # Arguments
    ///
    /// * `queue` - The queue name
    /// * `key` - Unique remote identifier of the target
    /// * `source` - The collector that produced the item
    /// * `ordering_ts` - Timestamp used for newest-first processing
    /// * `metadata` - Descriptive fields from the listing
    fn upsert_item(
        &mut self,
        queue: &str,
        key: &str,
        source: &str,
        ordering_ts: i64,
        metadata: &ItemMetadata,
    ) -> StorageResult<UpsertOutcome>;

    /// Gets an item by key
    fn get_item(&self, queue: &str, key: &str) -> StorageResult<Option<QueueItemRecord>>;

    /// Atomically claims the newest unclaimed pending item
    ///
    /// The claim is a conditional update, so two callers can never receive
    /// the same item.
    fn claim_next_pending(&mut self, queue: &str) -> StorageResult<Option<QueueItemRecord>>;

    /// Drops the claim on an item without touching its status or attempts
    fn release_claim(&mut self, queue: &str, key: &str) -> StorageResult<()>;

    /// Drops every claim in a queue; returns how many were released
    fn release_all_claims(&mut self, queue: &str) -> StorageResult<u64>;

    /// Completes claimed items whose latest action log entry is a send
    ///
    /// Covers a run that performed the action but could not mark the item
    /// done; returns how many items were completed.
    fn complete_sent_claims(&mut self, queue: &str) -> StorageResult<u64>;

    /// Marks a pending item done and stores the remote action id
    fn complete_item(
        &mut self,
        queue: &str,
        key: &str,
        remote_id: Option<&str>,
    ) -> StorageResult<()>;

    /// Records a failed attempt on a pending item
    ///
    /// # Arguments
    ///
    /// * `error` - Error message, truncated before storage
    /// * `max_attempts` - Attempts after which the item is marked failed
    /// * `immediate` - Mark failed now regardless of the attempt count
    ///
    /// # Returns
    ///
    /// The item's status after the update
    fn record_failure(
        &mut self,
        queue: &str,
        key: &str,
        error: &str,
        max_attempts: u32,
        immediate: bool,
    ) -> StorageResult<ItemStatus>;

    /// Moves every failed item back to pending with zero attempts
    fn reset_failed(&mut self, queue: &str) -> StorageResult<u64>;

    /// Lists items newest first, optionally filtered by status
    fn list_items(
        &self,
        queue: &str,
        status: Option<ItemStatus>,
        limit: u32,
    ) -> StorageResult<Vec<QueueItemRecord>>;

    /// Counts items by status
    fn queue_stats(&self, queue: &str) -> StorageResult<QueueStats>;

    /// Lists every queue that has at least one item
    fn list_queues(&self) -> StorageResult<Vec<String>>;

    /// Deletes items, optionally only those with the given status
    fn clear_items(&mut self, queue: &str, status: Option<ItemStatus>) -> StorageResult<u64>;

    /// Deletes specific items by key
    fn remove_items(&mut self, queue: &str, keys: &[String]) -> StorageResult<u64>;

    // ===== Collector Cursors =====

    /// Gets the stored cursor for a collector source
    fn get_cursor(&self, source: &str) -> StorageResult<Option<String>>;

    /// Stores the cursor for a collector source
    fn set_cursor(&mut self, source: &str, cursor: &str) -> StorageResult<()>;

    // ===== Action Log =====

    /// Appends an entry to the action audit log
    fn record_action(
        &mut self,
        queue: &str,
        key: &str,
        outcome: ActionOutcome,
        remote_id: Option<&str>,
        content: Option<&str>,
        error: Option<&str>,
    ) -> StorageResult<()>;

    /// Gets the most recent log entries, optionally for one queue
    fn recent_actions(&self, queue: Option<&str>, limit: u32)
        -> StorageResult<Vec<ActionLogRecord>>;
}
