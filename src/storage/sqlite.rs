//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::ItemStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    ActionLogRecord, ActionOutcome, ItemMetadata, QueueItemRecord, QueueStats, UpsertOutcome,
};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

/// Longest error message kept in `last_error` and the action log
const MAX_ERROR_LEN: usize = 500;

const ITEM_COLUMNS: &str = "id, queue, key, source, ordering_ts, status, attempts, last_error,
     title, author, url, remote_id, claimed_at IS NOT NULL, created_at, updated_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // A collector run from the CLI may share the file with a running worker
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_LEN).collect()
}

fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<ItemStatus> {
    let raw: String = row.get(idx)?;
    ItemStatus::from_db_string(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown item status '{}'", raw).into(),
        )
    })
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<QueueItemRecord> {
    Ok(QueueItemRecord {
        id: row.get(0)?,
        queue: row.get(1)?,
        key: row.get(2)?,
        source: row.get(3)?,
        ordering_ts: row.get(4)?,
        status: status_column(row, 5)?,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
        title: row.get(8)?,
        author: row.get(9)?,
        url: row.get(10)?,
        remote_id: row.get(11)?,
        claimed: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

/// Reads the status and attempt count of an item
fn current_state(conn: &Connection, queue: &str, key: &str) -> StorageResult<(ItemStatus, u32)> {
    conn.query_row(
        "SELECT status, attempts FROM queue_items WHERE queue = ?1 AND key = ?2",
        params![queue, key],
        |row| Ok((status_column(row, 0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| StorageError::ItemNotFound {
        queue: queue.to_string(),
        key: key.to_string(),
    })
}

impl Storage for SqliteStorage {
    // ===== Queue Items =====

    fn upsert_item(
        &mut self,
        queue: &str,
        key: &str,
        source: &str,
        ordering_ts: i64,
        metadata: &ItemMetadata,
    ) -> StorageResult<UpsertOutcome> {
        let tx = self.conn.transaction()?;
        let now = now();

        let existing = tx
            .query_row(
                "SELECT status, ordering_ts FROM queue_items WHERE queue = ?1 AND key = ?2",
                params![queue, key],
                |row| Ok((status_column(row, 0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO queue_items
                     (queue, key, source, ordering_ts, status, title, author, url, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                    params![
                        queue,
                        key,
                        source,
                        ordering_ts,
                        ItemStatus::Pending.to_db_string(),
                        metadata.title,
                        metadata.author,
                        metadata.url,
                        now
                    ],
                )?;
                UpsertOutcome::Inserted
            }
            Some((status, old_ts)) => {
                // Status is never written here: a done item stays done
                tx.execute(
                    "UPDATE queue_items
                     SET ordering_ts = MAX(ordering_ts, ?3),
                         title = COALESCE(?4, title),
                         author = COALESCE(?5, author),
                         url = COALESCE(?6, url),
                         updated_at = ?7
                     WHERE queue = ?1 AND key = ?2",
                    params![
                        queue,
                        key,
                        ordering_ts,
                        metadata.title,
                        metadata.author,
                        metadata.url,
                        now
                    ],
                )?;

                if status == ItemStatus::Pending && ordering_ts > old_ts {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Unchanged
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn get_item(&self, queue: &str, key: &str) -> StorageResult<Option<QueueItemRecord>> {
        let item = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM queue_items WHERE queue = ?1 AND key = ?2",
                    ITEM_COLUMNS
                ),
                params![queue, key],
                row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    fn claim_next_pending(&mut self, queue: &str) -> StorageResult<Option<QueueItemRecord>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<i64> = tx
            .query_row(
                "SELECT id FROM queue_items
                 WHERE queue = ?1 AND status = ?2 AND claimed_at IS NULL
                 ORDER BY ordering_ts DESC, id ASC
                 LIMIT 1",
                params![queue, ItemStatus::Pending.to_db_string()],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let now = now();
        let claimed = tx.execute(
            "UPDATE queue_items SET claimed_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status = ?3 AND claimed_at IS NULL",
            params![now, id, ItemStatus::Pending.to_db_string()],
        )?;

        if claimed != 1 {
            tx.commit()?;
            return Ok(None);
        }

        let item = tx.query_row(
            &format!("SELECT {} FROM queue_items WHERE id = ?1", ITEM_COLUMNS),
            params![id],
            row_to_item,
        )?;

        tx.commit()?;
        Ok(Some(item))
    }

    fn release_claim(&mut self, queue: &str, key: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE queue_items SET claimed_at = NULL WHERE queue = ?1 AND key = ?2",
            params![queue, key],
        )?;

        if changed == 0 {
            return Err(StorageError::ItemNotFound {
                queue: queue.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn release_all_claims(&mut self, queue: &str) -> StorageResult<u64> {
        let changed = self.conn.execute(
            "UPDATE queue_items SET claimed_at = NULL
             WHERE queue = ?1 AND claimed_at IS NOT NULL",
            params![queue],
        )?;
        Ok(changed as u64)
    }

    fn complete_sent_claims(&mut self, queue: &str) -> StorageResult<u64> {
        let changed = self.conn.execute(
            "UPDATE queue_items
             SET status = ?2, last_error = NULL, claimed_at = NULL, updated_at = ?4,
                 remote_id = COALESCE(
                     (SELECT a.remote_id FROM action_log a
                      WHERE a.queue = queue_items.queue AND a.key = queue_items.key
                      ORDER BY a.id DESC LIMIT 1),
                     remote_id)
             WHERE queue = ?1 AND status = ?3 AND claimed_at IS NOT NULL
               AND (SELECT a.outcome FROM action_log a
                    WHERE a.queue = queue_items.queue AND a.key = queue_items.key
                    ORDER BY a.id DESC LIMIT 1) = ?5",
            params![
                queue,
                ItemStatus::Done.to_db_string(),
                ItemStatus::Pending.to_db_string(),
                now(),
                ActionOutcome::Sent.to_db_string()
            ],
        )?;
        Ok(changed as u64)
    }

    fn complete_item(
        &mut self,
        queue: &str,
        key: &str,
        remote_id: Option<&str>,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let (status, _) = current_state(&tx, queue, key)?;

        if !status.can_transition_to(ItemStatus::Done) {
            return Err(StorageError::InvalidTransition {
                key: key.to_string(),
                from: status,
                to: ItemStatus::Done,
            });
        }

        tx.execute(
            "UPDATE queue_items
             SET status = ?3, remote_id = COALESCE(?4, remote_id), last_error = NULL,
                 claimed_at = NULL, updated_at = ?5
             WHERE queue = ?1 AND key = ?2",
            params![queue, key, ItemStatus::Done.to_db_string(), remote_id, now()],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn record_failure(
        &mut self,
        queue: &str,
        key: &str,
        error: &str,
        max_attempts: u32,
        immediate: bool,
    ) -> StorageResult<ItemStatus> {
        let tx = self.conn.transaction()?;
        let (status, attempts) = current_state(&tx, queue, key)?;
        let attempts = attempts.saturating_add(1);

        let next = if immediate || attempts >= max_attempts {
            ItemStatus::Failed
        } else {
            ItemStatus::Pending
        };

        if !status.can_transition_to(next) {
            return Err(StorageError::InvalidTransition {
                key: key.to_string(),
                from: status,
                to: next,
            });
        }

        tx.execute(
            "UPDATE queue_items
             SET status = ?3, attempts = ?4, last_error = ?5, claimed_at = NULL, updated_at = ?6
             WHERE queue = ?1 AND key = ?2",
            params![
                queue,
                key,
                next.to_db_string(),
                attempts,
                truncate_error(error),
                now()
            ],
        )?;

        tx.commit()?;
        Ok(next)
    }

    fn reset_failed(&mut self, queue: &str) -> StorageResult<u64> {
        let tx = self.conn.transaction()?;
        let mut changed = 0;

        for status in ItemStatus::all_states().iter().filter(|s| s.can_reset()) {
            changed += tx.execute(
                "UPDATE queue_items
                 SET status = ?2, attempts = 0, last_error = NULL, claimed_at = NULL, updated_at = ?4
                 WHERE queue = ?1 AND status = ?3",
                params![
                    queue,
                    ItemStatus::Pending.to_db_string(),
                    status.to_db_string(),
                    now()
                ],
            )?;
        }

        tx.commit()?;
        Ok(changed as u64)
    }

    fn list_items(
        &self,
        queue: &str,
        status: Option<ItemStatus>,
        limit: u32,
    ) -> StorageResult<Vec<QueueItemRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM queue_items
             WHERE queue = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY ordering_ts DESC, id ASC
             LIMIT ?3",
            ITEM_COLUMNS
        ))?;

        let items = stmt
            .query_map(
                params![queue, status.map(|s| s.to_db_string()), limit],
                row_to_item,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    fn queue_stats(&self, queue: &str) -> StorageResult<QueueStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM queue_items WHERE queue = ?1 GROUP BY status")?;

        let mut stats = QueueStats::default();
        let rows = stmt.query_map(params![queue], |row| {
            Ok((status_column(row, 0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;
            let count = count as u64;
            match status {
                ItemStatus::Pending => stats.pending = count,
                ItemStatus::Done => stats.done = count,
                ItemStatus::Failed => stats.failed = count,
            }
            stats.total += count;
        }

        Ok(stats)
    }

    fn list_queues(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT queue FROM queue_items ORDER BY queue")?;
        let queues = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(queues)
    }

    fn clear_items(&mut self, queue: &str, status: Option<ItemStatus>) -> StorageResult<u64> {
        let changed = self.conn.execute(
            "DELETE FROM queue_items WHERE queue = ?1 AND (?2 IS NULL OR status = ?2)",
            params![queue, status.map(|s| s.to_db_string())],
        )?;
        Ok(changed as u64)
    }

    fn remove_items(&mut self, queue: &str, keys: &[String]) -> StorageResult<u64> {
        let tx = self.conn.transaction()?;
        let mut removed = 0u64;
        {
            let mut stmt = tx.prepare("DELETE FROM queue_items WHERE queue = ?1 AND key = ?2")?;
            for key in keys {
                removed += stmt.execute(params![queue, key])? as u64;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    // ===== Collector Cursors =====

    fn get_cursor(&self, source: &str) -> StorageResult<Option<String>> {
        let cursor = self
            .conn
            .query_row(
                "SELECT cursor FROM collector_cursors WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor)
    }

    fn set_cursor(&mut self, source: &str, cursor: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO collector_cursors (source, cursor, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at",
            params![source, cursor, now()],
        )?;
        Ok(())
    }

    // ===== Action Log =====

    fn record_action(
        &mut self,
        queue: &str,
        key: &str,
        outcome: ActionOutcome,
        remote_id: Option<&str>,
        content: Option<&str>,
        error: Option<&str>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO action_log (queue, key, outcome, remote_id, content, error, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                queue,
                key,
                outcome.to_db_string(),
                remote_id,
                content,
                error.map(truncate_error),
                now()
            ],
        )?;
        Ok(())
    }

    fn recent_actions(
        &self,
        queue: Option<&str>,
        limit: u32,
    ) -> StorageResult<Vec<ActionLogRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, queue, key, outcome, remote_id, content, error, created_at
             FROM action_log
             WHERE ?1 IS NULL OR queue = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![queue, limit], |row| {
                let raw: String = row.get(3)?;
                let outcome = ActionOutcome::from_db_string(&raw).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        3,
                        Type::Text,
                        format!("unknown action outcome '{}'", raw).into(),
                    )
                })?;
                Ok(ActionLogRecord {
                    id: row.get(0)?,
                    queue: row.get(1)?,
                    key: row.get(2)?,
                    outcome,
                    remote_id: row.get(4)?,
                    content: row.get(5)?,
                    error: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}
