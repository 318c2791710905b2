use crate::config::types::{Config, FetchConfig, QueueConfig, StorageConfig, UpstreamConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_upstream_config(&config.upstream)?;
    validate_queue_config(&config.queues)?;
    validate_storage_config(&config.storage)?;
    validate_fetch_config(&config.fetch)?;
    Ok(())
}

/// Validates the upstream API configuration
fn validate_upstream_config(config: &UpstreamConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "base-url must use HTTPS scheme, got '{}'",
            config.base_url
        )));
    }

    if config.base_url.ends_with('/') {
        return Err(ConfigError::Validation(
            "base-url must not end with a trailing slash".to_string(),
        ));
    }

    if config.items_per_page < 1 {
        return Err(ConfigError::Validation(format!(
            "items-per-page must be >= 1, got {}",
            config.items_per_page
        )));
    }

    if config.categories.is_empty() {
        return Err(ConfigError::Validation(
            "at least one category must be configured".to_string(),
        ));
    }

    for category in &config.categories {
        validate_category(category)?;
    }

    Ok(())
}

/// Validates a category identifier
///
/// Categories become URL path segments and blob key components, so only
/// alphanumerics, hyphens, and internal slashes are accepted.
fn validate_category(category: &str) -> Result<(), ConfigError> {
    if category.is_empty() {
        return Err(ConfigError::Validation(
            "category cannot be empty".to_string(),
        ));
    }

    if !category
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '/')
    {
        return Err(ConfigError::Validation(format!(
            "category '{}' contains invalid characters",
            category
        )));
    }

    if category.starts_with('/') || category.ends_with('/') {
        return Err(ConfigError::Validation(format!(
            "category '{}' cannot start or end with '/'",
            category
        )));
    }

    Ok(())
}

/// Validates queue configuration
fn validate_queue_config(config: &QueueConfig) -> Result<(), ConfigError> {
    if config.page_batch_queue.is_empty() || config.id_batch_queue.is_empty() {
        return Err(ConfigError::Validation(
            "queue names cannot be empty".to_string(),
        ));
    }

    if config.page_batch_queue == config.id_batch_queue {
        return Err(ConfigError::Validation(
            "page-batch-queue and id-batch-queue must be distinct".to_string(),
        ));
    }

    if config.page_batch_size < 1 || config.page_batch_size > 1000 {
        return Err(ConfigError::Validation(format!(
            "page-batch-size must be between 1 and 1000, got {}",
            config.page_batch_size
        )));
    }

    if config.id_batch_size < 1 || config.id_batch_size > 1000 {
        return Err(ConfigError::Validation(format!(
            "id-batch-size must be between 1 and 1000, got {}",
            config.id_batch_size
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.blob_root.is_empty() {
        return Err(ConfigError::Validation(
            "blob-root cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates fetch session configuration
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.regions.is_empty() {
        return Err(ConfigError::Validation(
            "at least one egress region must be configured".to_string(),
        ));
    }

    if config.search_max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "search-max-attempts must be >= 1, got {}",
            config.search_max_attempts
        )));
    }

    if config.detail_max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "detail-max-attempts must be >= 1, got {}",
            config.detail_max_attempts
        )));
    }

    if config.search_timeout_ms < 100 || config.detail_timeout_ms < 100 {
        return Err(ConfigError::Validation(
            "fetch timeouts must be >= 100ms".to_string(),
        ));
    }

    Ok(())
}
