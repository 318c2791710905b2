//! Immo-Harvest: an incremental real-estate listing harvester
//!
//! This crate implements a three-stage crawl pipeline over a paginated listing
//! search API: a dispatcher plans page-number batches, a discovery worker finds
//! listing ids newer than a per-category watermark, and an extractor worker
//! fetches full detail records for those ids.

pub mod config;
pub mod fetch;
pub mod pipeline;
pub mod queue;
pub mod store;

use thiserror::Error;

/// Main error type for Immo-Harvest operations
///
/// Errors reaching this level are fatal for the enclosing invocation.
/// Per-message failures are carried separately as
/// [`pipeline::UnitError`] so a single bad message never aborts the run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Egress rotation error: {0}")]
    Rotation(#[from] fetch::RotationError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Blob store error: {0}")]
    Blob(#[from] store::BlobError),

    #[error("Watermark store error: {0}")]
    Watermark(#[from] store::WatermarkError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Immo-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use fetch::{FetchOutcome, FetchSession, RetryPolicy};
pub use pipeline::{Budget, FailureReport, UnitError};
