//! State module for queue items and workers
//!
//! # Components
//!
//! - `ItemStatus`: Tracks the status of individual queue items (pending, done, failed)
//! - `RunState`: Lifecycle of a background worker
//! - `StopReason`: Why a worker stopped

mod item_status;
mod run_state;

// Re-export main types
pub use item_status::ItemStatus;
pub use run_state::{RunState, StopReason};
