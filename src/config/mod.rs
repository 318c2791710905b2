//! Configuration module for Immo-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use immo_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvesting {} categories", config.upstream.categories.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{BudgetConfig, Config, FetchConfig, QueueConfig, StorageConfig, UpstreamConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
