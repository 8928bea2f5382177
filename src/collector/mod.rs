//! Feed collection
//!
//! This module walks offset-paginated listings and upserts what it finds into
//! work queues:
//! - listing page parsing and item normalization
//! - per-source cursor persistence
//! - rate-limit aware page fetching

mod feed;
mod page;

pub use feed::FeedCollector;
pub use page::{normalize_item, FeedPage, NextOffset, NormalizedItem};

use serde::Serialize;

/// Counts from one collection run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectReport {
    pub source: String,
    pub start_offset: u64,
    /// Offset stored for the next run
    pub final_offset: u64,
    pub pages_fetched: u32,
    /// Keys seen for the first time
    pub items_added: u64,
    /// Existing pending keys whose ordering timestamp advanced
    pub items_updated: u64,
    /// Results without a usable key
    pub items_skipped: u64,
}

impl CollectReport {
    pub fn new(source: &str, start_offset: u64) -> Self {
        Self {
            source: source.to_string(),
            start_offset,
            final_offset: start_offset,
            ..Self::default()
        }
    }
}
