//! Configuration module for Feedpace
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The resulting [`Config`] is built once and handed to every component; nothing
//! reads configuration lazily.
//!
//! # Example
//!
//! ```no_run
//! use feedpace::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("feedpace.toml")).unwrap();
//! println!("Max attempts per item: {}", config.worker.max_attempts);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ActionConfig, ActionKind, ApiConfig, Config, FeedConfig, FieldMap, RateLimitConfig,
    StorageConfig, TemplateConfig, WorkerConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
