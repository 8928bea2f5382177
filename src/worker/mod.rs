//! Background workers
//!
//! This module contains:
//! - The [`WorkerLoop`] lifecycle and main loop
//! - The per-item write action
//! - Status counters shared with callers

mod action;
mod stats;
mod worker_loop;

pub use action::{ActionError, ActionReceipt, ActionRunner};
pub use stats::{StatsTracker, WorkerStatus};
pub use worker_loop::{StartOptions, WorkerLoop};
