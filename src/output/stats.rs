//! Statistics generation from the queue database
//!
//! This module provides functionality for extracting and displaying
//! queue and action log statistics from the storage layer.

use crate::storage::{ActionLogRecord, ActionOutcome, QueueStats, Storage};
use crate::FeedpaceError;
use serde::Serialize;

/// Number of action log entries shown by default
pub const DEFAULT_RECENT_ACTIONS: u32 = 10;

/// Queue and action statistics summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStatistics {
    /// Item counts per queue, by queue name
    pub queues: Vec<(String, QueueStats)>,

    /// Counts summed over every queue
    pub totals: QueueStats,

    /// Most recent action log entries, newest first
    pub recent_actions: Vec<ActionLogRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
/// * `recent` - How many action log entries to include
///
/// # Returns
///
/// * `Ok(QueueStatistics)` - Successfully loaded statistics
/// * `Err(FeedpaceError)` - Failed to query statistics
pub fn load_statistics(
    storage: &dyn Storage,
    recent: u32,
) -> Result<QueueStatistics, FeedpaceError> {
    let mut queues = Vec::new();
    let mut totals = QueueStats::default();

    for name in storage.list_queues()? {
        let stats = storage.queue_stats(&name)?;
        totals.pending += stats.pending;
        totals.done += stats.done;
        totals.failed += stats.failed;
        totals.total += stats.total;
        queues.push((name, stats));
    }

    let recent_actions = storage.recent_actions(None, recent)?;

    Ok(QueueStatistics {
        queues,
        totals,
        recent_actions,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &QueueStatistics) {
    println!("=== Queue Statistics ===\n");

    if stats.queues.is_empty() {
        println!("No queued items yet.");
        return;
    }

    println!("Queues:");
    for (name, counts) in &stats.queues {
        println!(
            "  {}: {} pending, {} done, {} failed ({} total)",
            name, counts.pending, counts.done, counts.failed, counts.total
        );
    }
    println!();

    println!("Overall:");
    println!("  Pending: {}", stats.totals.pending);
    println!("  Done: {}", stats.totals.done);
    println!("  Failed: {}", stats.totals.failed);
    println!();

    if !stats.recent_actions.is_empty() {
        println!("Recent Actions ({}):", stats.recent_actions.len());
        for entry in &stats.recent_actions {
            match entry.outcome {
                ActionOutcome::Sent => println!(
                    "  {} [{}] {} sent{}",
                    entry.created_at,
                    entry.queue,
                    entry.key,
                    entry
                        .remote_id
                        .as_deref()
                        .map(|id| format!(" (id {})", id))
                        .unwrap_or_default()
                ),
                ActionOutcome::Failed => println!(
                    "  {} [{}] {} failed: {}",
                    entry.created_at,
                    entry.queue,
                    entry.key,
                    entry.error.as_deref().unwrap_or("unknown error")
                ),
            }
        }
        println!();
    }

    println!(
        "Completion Rate: {:.1}% ({} / {} items done)",
        completion_rate(&stats.totals),
        stats.totals.done,
        stats.totals.total
    );
}

/// Percentage of items that reached `done`
pub fn completion_rate(stats: &QueueStats) -> f64 {
    if stats.total > 0 {
        (stats.done as f64 / stats.total as f64) * 100.0
    } else {
        0.0
    }
}
