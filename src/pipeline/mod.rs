//! Crawl pipeline stages
//!
//! Three stages connected by batch queues:
//! dispatcher -> page-batch queue -> discovery worker -> id-batch queue ->
//! extractor worker. Each invocation processes its units of work
//! sequentially, commits successes independently, and reports failed units
//! for redelivery.

mod budget;
mod chunk;
mod dispatcher;
mod discovery;
mod extractor;
mod messages;
mod report;

pub use budget::Budget;
pub use chunk::chunk_list;
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use discovery::DiscoveryWorker;
pub use extractor::ExtractorWorker;
pub use messages::{IdBatch, PageBatch};
pub use report::{FailureReport, UnitError};

use chrono::Utc;
use rand::Rng;

/// URL of one search-results page for a category
pub(crate) fn search_url(base_url: &str, category: &str, page: u32) -> String {
    format!("{}/search-results/{}?page={}", base_url, category, page)
}

/// URL of one listing's detail record
pub(crate) fn detail_url(base_url: &str, listing_id: i64) -> String {
    format!("{}/classified/get-result/{}", base_url, listing_id)
}

/// Unique blob key for one processed batch
///
/// Namespaced by prefix and category; the second-resolution timestamp plus a
/// random suffix keeps concurrent invocations from colliding, and the blob
/// store's write-once check catches the rest.
pub(crate) fn blob_key(prefix: &str, category: &str) -> String {
    let timestamp = Utc::now().format("%H%M%S%m%d%Y");
    let suffix: u32 = rand::thread_rng().gen_range(1000..=9999);
    format!(
        "{}/{}/{}_{}_{}.json",
        prefix,
        category,
        category.replace('/', "-"),
        suffix,
        timestamp
    )
}
