//! Extractor worker stage
//!
//! Consumes id batches and fetches the full detail record for each listing.
//! Failure granularity is fine-grained here, in deliberate contrast with
//! discovery: a listing whose detail fetch exhausts its attempts is logged
//! and skipped on its own, since losing one detail should not force the whole
//! batch to be refetched. A 404 is not a failure at all; the listing was
//! likely removed between discovery and extraction.

use crate::config::Config;
use crate::fetch::{FetchError, FetchOutcome, FetchSession, RetryPolicy, RotationProvider};
use crate::pipeline::{blob_key, detail_url, Budget, FailureReport, IdBatch, UnitError};
use crate::queue::QueueMessage;
use crate::store::BlobStore;
use crate::Result;
use std::collections::BTreeMap;
use std::time::Duration;

/// Fetches and persists full detail records for discovered listings
pub struct ExtractorWorker<'a> {
    config: &'a Config,
    blobs: &'a dyn BlobStore,
    rotation: &'a dyn RotationProvider,
}

impl<'a> ExtractorWorker<'a> {
    pub fn new(
        config: &'a Config,
        blobs: &'a dyn BlobStore,
        rotation: &'a dyn RotationProvider,
    ) -> Self {
        Self {
            config,
            blobs,
            rotation,
        }
    }

    /// Processes a list of id-batch messages sequentially
    ///
    /// Same isolation contract as discovery: one session for the whole
    /// invocation, per-message commit/failure, near-deadline messages failed
    /// preemptively without a single fetch.
    pub async fn run(
        &self,
        messages: &[QueueMessage],
        budget: &Budget,
    ) -> Result<FailureReport> {
        let reserve = Duration::from_millis(self.config.budget.message_reserve_ms);
        let mut report = FailureReport::new();

        let session = FetchSession::acquire(self.rotation, &self.config.fetch).await?;

        for message in messages {
            if budget.is_below(reserve) {
                tracing::warn!(
                    "Approaching deadline, failing message {} without attempting it",
                    message.id
                );
                report.record(&message.id);
                continue;
            }

            if let Err(e) = self.process_message(&session, message).await {
                tracing::error!("Failed to process message {}: {}", message.id, e);
                report.record(&message.id);
            }
        }

        session.close().await;

        tracing::info!(
            "Extraction finished: {}/{} messages failed",
            report.len(),
            messages.len()
        );
        Ok(report)
    }

    async fn process_message(
        &self,
        session: &FetchSession<'_>,
        message: &QueueMessage,
    ) -> std::result::Result<(), UnitError> {
        let batch = IdBatch::from_json(&message.body)?;
        let category = &batch.transaction_type;

        tracing::info!(
            "Processing batch of {} ids for {}",
            batch.listing_ids.len(),
            category
        );

        let policy = RetryPolicy::detail(&self.config.fetch);
        let mut details: BTreeMap<i64, serde_json::Value> = BTreeMap::new();

        for listing_id in &batch.listing_ids {
            let url = detail_url(&self.config.upstream.base_url, *listing_id);

            match session.fetch_json(&url, &policy).await {
                Ok(FetchOutcome::Body(mut body)) => match body.get_mut("classified") {
                    Some(classified) if !classified.is_null() => {
                        details.insert(*listing_id, classified.take());
                    }
                    _ => {
                        tracing::warn!("No classified payload for listing {}", listing_id);
                    }
                },
                Ok(FetchOutcome::Missing) => {
                    tracing::info!(
                        "Listing {} not found (404); likely removed after discovery",
                        listing_id
                    );
                }
                Ok(FetchOutcome::Unparseable) => {
                    tracing::warn!("Unparseable detail body for listing {}", listing_id);
                }
                Err(e @ FetchError::Exhausted { .. }) => {
                    // Only this id is lost; the rest of the batch proceeds.
                    tracing::error!("Giving up on listing {}: {}", listing_id, e);
                }
            }
        }

        if !details.is_empty() {
            let key = blob_key("details", category);
            let body = serde_json::to_vec(&details)?;
            // Losing already-fetched details silently would be worse than a
            // redundant redelivery, so a blob failure fails the message.
            self.blobs.put(&key, &body)?;
            tracing::info!("Wrote {} details to {}", details.len(), key);
        }

        Ok(())
    }
}
