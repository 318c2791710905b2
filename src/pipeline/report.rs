//! Per-message failure tracking
//!
//! Two explicit failure channels run through the workers. A [`UnitError`]
//! fails one message: it is logged, its id lands in the [`FailureReport`],
//! and processing continues. A [`crate::HarvestError`] escaping a worker's
//! `run` is fatal and aborts the remaining invocation. Keeping the two as
//! separate types (rather than catch-site conventions) makes the disposition
//! of every failure visible in the signatures.

use crate::fetch::FetchError;
use crate::store::{BlobError, WatermarkError};
use crate::{queue::QueueError, HarvestError};
use thiserror::Error;

/// Failure that invalidates one queue message but not the invocation
#[derive(Debug, Error)]
pub enum UnitError {
    /// Message body did not parse into its wire type; no retry will fix it,
    /// redelivery and eventual dead-lettering are the queue's concern
    #[error("Malformed message body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A search page exhausted its fetch attempts; the whole page batch is
    /// failed, not just the page
    #[error("Page {page} failed: {source}")]
    PageExhausted { page: u32, source: FetchError },

    /// A collaborator (queue, blob store, watermark store) failed while the
    /// message was being committed
    #[error("Infrastructure failure: {0}")]
    Infrastructure(HarvestError),
}

impl From<QueueError> for UnitError {
    fn from(e: QueueError) -> Self {
        Self::Infrastructure(HarvestError::Queue(e))
    }
}

impl From<BlobError> for UnitError {
    fn from(e: BlobError) -> Self {
        Self::Infrastructure(HarvestError::Blob(e))
    }
}

impl From<WatermarkError> for UnitError {
    fn from(e: WatermarkError) -> Self {
        Self::Infrastructure(HarvestError::Watermark(e))
    }
}

/// Message ids an invocation could not complete
///
/// Returned from every worker run; an empty report means full success. The
/// harness releases reported messages back to their queue for redelivery.
#[derive(Debug, Default)]
pub struct FailureReport {
    failed: Vec<String>,
}

impl FailureReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, message_id: &str) {
        self.failed.push(message_id.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.failed.iter().any(|id| id == message_id)
    }

    pub fn failed_ids(&self) -> &[String] {
        &self.failed
    }
}
