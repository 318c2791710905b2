use serde::Deserialize;

/// Main configuration structure for Immo-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub queues: QueueConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
}

/// Upstream listing API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the listing site (no trailing slash)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Number of results per search page
    #[serde(rename = "items-per-page", default = "default_items_per_page")]
    pub items_per_page: u32,

    /// Fallback total-item count when the search response omits it
    #[serde(rename = "default-total-items", default = "default_total_items")]
    pub default_total_items: u32,

    /// Listing categories to harvest (e.g. "house/for-sale")
    pub categories: Vec<String>,
}

/// Batch queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Queue name for page-number batches (dispatcher -> discovery)
    #[serde(rename = "page-batch-queue")]
    pub page_batch_queue: String,

    /// Queue name for listing-id batches (discovery -> extractor)
    #[serde(rename = "id-batch-queue")]
    pub id_batch_queue: String,

    /// Maximum page numbers per page-batch message
    #[serde(rename = "page-batch-size", default = "default_page_batch_size")]
    pub page_batch_size: usize,

    /// Maximum listing ids per id-batch message
    #[serde(rename = "id-batch-size", default = "default_id_batch_size")]
    pub id_batch_size: usize,
}

/// Local persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database backing the queues and watermarks
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Root directory for snapshot and detail blobs
    #[serde(rename = "blob-root")]
    pub blob_root: String,
}

/// Fetch session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Egress regions the rotation provider may bind a session to
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,

    /// Attempts per search-page fetch before the page batch is failed
    #[serde(rename = "search-max-attempts", default = "default_search_attempts")]
    pub search_max_attempts: u32,

    /// Attempts per detail fetch before that id is skipped
    #[serde(rename = "detail-max-attempts", default = "default_detail_attempts")]
    pub detail_max_attempts: u32,

    /// Per-request timeout for search-page fetches (milliseconds)
    #[serde(rename = "search-timeout-ms", default = "default_search_timeout")]
    pub search_timeout_ms: u64,

    /// Per-request timeout for detail fetches (milliseconds)
    #[serde(rename = "detail-timeout-ms", default = "default_detail_timeout")]
    pub detail_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            regions: default_regions(),
            search_max_attempts: default_search_attempts(),
            detail_max_attempts: default_detail_attempts(),
            search_timeout_ms: default_search_timeout(),
            detail_timeout_ms: default_detail_timeout(),
        }
    }
}

/// Invocation time-budget configuration
///
/// Every unit of work (a category for the dispatcher, a message for the
/// workers) checks the remaining budget before starting, and is skipped or
/// preemptively failed once the relevant reserve is reached.
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Total wall-clock budget for one invocation (milliseconds)
    #[serde(rename = "invocation-ms", default = "default_invocation_ms")]
    pub invocation_ms: u64,

    /// Stop dispatching further categories below this remainder (milliseconds)
    #[serde(rename = "category-reserve-ms", default = "default_category_reserve")]
    pub category_reserve_ms: u64,

    /// Preemptively fail unstarted messages below this remainder (milliseconds)
    #[serde(rename = "message-reserve-ms", default = "default_message_reserve")]
    pub message_reserve_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            invocation_ms: default_invocation_ms(),
            category_reserve_ms: default_category_reserve(),
            message_reserve_ms: default_message_reserve(),
        }
    }
}

fn default_items_per_page() -> u32 {
    30
}

fn default_total_items() -> u32 {
    9969
}

fn default_page_batch_size() -> usize {
    120
}

fn default_id_batch_size() -> usize {
    100
}

fn default_regions() -> Vec<String> {
    [
        "us-east-1",
        "us-east-2",
        "us-west-1",
        "us-west-2",
        "eu-west-1",
        "eu-west-2",
        "eu-west-3",
        "eu-north-1",
        "eu-central-1",
        "ca-central-1",
        "ap-south-1",
        "ap-northeast-1",
        "ap-northeast-2",
        "ap-northeast-3",
        "ap-southeast-1",
        "ap-southeast-2",
        "sa-east-1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_search_attempts() -> u32 {
    5
}

fn default_detail_attempts() -> u32 {
    3
}

fn default_search_timeout() -> u64 {
    10_000
}

fn default_detail_timeout() -> u64 {
    5_000
}

fn default_invocation_ms() -> u64 {
    840_000
}

fn default_category_reserve() -> u64 {
    30_000
}

fn default_message_reserve() -> u64 {
    10_000
}
