//! Output module for operator-facing reports
//!
//! This module handles:
//! - Queue and action log statistics
//! - Printing worker status, queue listings and collection results

pub mod stats;

pub use stats::{completion_rate, load_statistics, print_statistics, QueueStatistics};

use crate::collector::CollectReport;
use crate::queue::QueueItem;
use crate::worker::WorkerStatus;

/// Prints one line per worker
pub fn print_status(statuses: &[WorkerStatus]) {
    println!("=== Workers ===\n");
    for status in statuses {
        let reason = status
            .stop_reason
            .map(|r| format!(" ({})", r))
            .unwrap_or_default();
        println!("{}: {}{}", status.queue, status.state, reason);
        println!(
            "  processed: {}, errors: {}, consecutive failures: {}",
            status.processed, status.errors, status.consecutive_failures
        );
        if let Some(stats) = &status.queue_stats {
            println!(
                "  queue: {} pending, {} done, {} failed",
                stats.pending, stats.done, stats.failed
            );
        }
        if let Some(error) = &status.last_error {
            println!("  last error: {}", error);
        }
    }
}

/// Prints queue items, highest ordering timestamp first
pub fn print_items(queue: &str, items: &[QueueItem]) {
    println!("=== {} ({} items) ===\n", queue, items.len());
    for item in items {
        let title = item.title.as_deref().unwrap_or("(untitled)");
        let author = item
            .author
            .as_deref()
            .map(|a| format!(" by {}", a))
            .unwrap_or_default();
        println!(
            "  [{}] {} {}{} (ts {}, attempts {})",
            item.status, item.key, title, author, item.ordering_ts, item.attempts
        );
        if let Some(error) = &item.last_error {
            println!("      last error: {}", error);
        }
    }
}

/// Prints the counts from one collection run
pub fn print_collect_report(report: &CollectReport) {
    println!("Collected '{}':", report.source);
    println!("  Pages fetched: {}", report.pages_fetched);
    println!("  New items: {}", report.items_added);
    println!("  Re-ordered items: {}", report.items_updated);
    if report.items_skipped > 0 {
        println!("  Skipped (no key): {}", report.items_skipped);
    }
    println!(
        "  Offset: {} -> {}",
        report.start_offset, report.final_offset
    );
}
