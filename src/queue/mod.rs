//! Persistent work queues
//!
//! A [`WorkQueue`] is a cheap, cloneable handle bound to one named queue in the
//! shared database. Collectors upsert into it and the queue's single worker
//! claims from it; every operation takes the storage lock for exactly one
//! transaction.
//!
//! Invariants enforced here:
//! - at most one item per key (per queue)
//! - a `done` item never becomes `pending` again
//! - a `failed` item only returns to `pending` through [`WorkQueue::reset_failed_to_pending`]
//! - a claimed item is handed to exactly one caller until it is completed,
//!   failed or released

use crate::state::ItemStatus;
use crate::storage::{self, SharedStorage, Storage, StorageError};
use crate::FeedpaceError;
use tracing::{debug, error, info, warn};

pub use crate::storage::{ItemMetadata, QueueItemRecord as QueueItem, QueueStats, UpsertOutcome};

/// Handle to one named queue
#[derive(Clone)]
pub struct WorkQueue {
    storage: SharedStorage,
    name: String,
    max_attempts: u32,
}

impl WorkQueue {
    /// Creates a handle for `name` over shared storage
    ///
    /// # Arguments
    ///
    /// * `storage` - The shared database
    /// * `name` - Queue name; items are scoped by it
    /// * `max_attempts` - Failed attempts after which an item is marked failed
    pub fn new(storage: SharedStorage, name: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            storage,
            name: name.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Inserts an item as pending, or refreshes an existing one without
    /// changing its status
    pub fn upsert(
        &self,
        key: &str,
        ordering_ts: i64,
        source: &str,
        metadata: &ItemMetadata,
    ) -> crate::Result<UpsertOutcome> {
        let mut db = storage::lock(&self.storage)?;
        let outcome = db.upsert_item(&self.name, key, source, ordering_ts, metadata)?;
        debug!(queue = %self.name, key, source, ?outcome, "Upserted item");
        Ok(outcome)
    }

    /// Claims the pending item with the highest `ordering_ts`
    ///
    /// Ties go to the item inserted first. The claim is taken with a
    /// conditional update inside an immediate transaction, so even two
    /// workers sharing a queue would never receive the same item.
    pub fn claim_one_pending(&self) -> crate::Result<Option<QueueItem>> {
        let mut db = storage::lock(&self.storage)?;
        Ok(db.claim_next_pending(&self.name)?)
    }

    /// Returns a claimed item to the pool untouched (no attempt is counted)
    pub fn release(&self, key: &str) -> crate::Result<()> {
        let mut db = storage::lock(&self.storage)?;
        db.release_claim(&self.name, key)?;
        Ok(())
    }

    /// Drops claims left behind by a worker that is no longer running
    ///
    /// A claimed item whose action was already logged as sent is marked done
    /// instead of released, so it is not acted on twice.
    pub fn release_stale_claims(&self) -> crate::Result<u64> {
        let mut db = storage::lock(&self.storage)?;
        let completed = db.complete_sent_claims(&self.name)?;
        if completed > 0 {
            warn!(queue = %self.name, completed, "Completed claims whose action was already sent");
        }
        let released = db.release_all_claims(&self.name)?;
        if released > 0 {
            warn!(queue = %self.name, released, "Released stale claims");
        }
        Ok(released)
    }

    /// Marks an item done and clears its last error
    ///
    /// # Arguments
    ///
    /// * `key` - The item key
    /// * `remote_id` - Identifier the platform returned for the action
    pub fn mark_done(&self, key: &str, remote_id: Option<&str>) -> crate::Result<()> {
        let mut db = storage::lock(&self.storage)?;
        db.complete_item(&self.name, key, remote_id)
            .map_err(|e| self.invariant_error(e))
    }

    /// Counts a failed attempt
    ///
    /// The item becomes `failed` once its attempts reach the maximum and stays
    /// `pending` (with `last_error` recorded) otherwise.
    ///
    /// # Returns
    ///
    /// The item's status after the update
    pub fn bump_failure(&self, key: &str, error: &str) -> crate::Result<ItemStatus> {
        self.record_failure(key, error, false)
    }

    /// Marks an item failed now, for errors that retrying cannot fix
    pub fn fail_now(&self, key: &str, error: &str) -> crate::Result<ItemStatus> {
        self.record_failure(key, error, true)
    }

    fn record_failure(&self, key: &str, error: &str, immediate: bool) -> crate::Result<ItemStatus> {
        let mut db = storage::lock(&self.storage)?;
        let status = db
            .record_failure(&self.name, key, error, self.max_attempts, immediate)
            .map_err(|e| self.invariant_error(e))?;

        if status == ItemStatus::Failed {
            info!(queue = %self.name, key, "Item marked failed: {}", error);
        }
        Ok(status)
    }

    /// Moves every failed item back to pending with zero attempts
    ///
    /// # Returns
    ///
    /// The number of items reset
    pub fn reset_failed_to_pending(&self) -> crate::Result<u64> {
        let mut db = storage::lock(&self.storage)?;
        let count = db.reset_failed(&self.name)?;
        info!(queue = %self.name, count, "Reset failed items to pending");
        Ok(count)
    }

    pub fn stats(&self) -> crate::Result<QueueStats> {
        let db = storage::lock(&self.storage)?;
        Ok(db.queue_stats(&self.name)?)
    }

    pub fn get(&self, key: &str) -> crate::Result<Option<QueueItem>> {
        let db = storage::lock(&self.storage)?;
        Ok(db.get_item(&self.name, key)?)
    }

    /// Lists pending items in the order the worker would claim them
    pub fn list_pending(&self, limit: u32) -> crate::Result<Vec<QueueItem>> {
        self.list(Some(ItemStatus::Pending), limit)
    }

    /// Lists items newest first, optionally filtered by status
    pub fn list(&self, status: Option<ItemStatus>, limit: u32) -> crate::Result<Vec<QueueItem>> {
        let db = storage::lock(&self.storage)?;
        Ok(db.list_items(&self.name, status, limit)?)
    }

    /// Administrative delete of items, optionally only one status
    pub fn clear(&self, status: Option<ItemStatus>) -> crate::Result<u64> {
        let mut db = storage::lock(&self.storage)?;
        let removed = db.clear_items(&self.name, status)?;
        warn!(queue = %self.name, removed, status = ?status, "Cleared queue items");
        Ok(removed)
    }

    /// Administrative delete of specific keys
    pub fn remove(&self, keys: &[String]) -> crate::Result<u64> {
        let mut db = storage::lock(&self.storage)?;
        Ok(db.remove_items(&self.name, keys)?)
    }

    fn invariant_error(&self, err: StorageError) -> FeedpaceError {
        match err {
            StorageError::InvalidTransition { key, from, to } => {
                error!(queue = %self.name, key = %key, %from, %to, "Rejected status transition");
                FeedpaceError::QueueInvariantViolation { key, from, to }
            }
            other => other.into(),
        }
    }
}
