//! Discovery worker stage
//!
//! Consumes page batches, scrapes every search page in the batch, and works
//! out which listing ids are new relative to the category's watermark. New
//! ids are forwarded in bounded batches to the extraction queue, the raw
//! summaries are snapshotted to the blob store, and the watermark advances to
//! the highest id seen.
//!
//! Failure granularity is deliberately coarse here: one page that exhausts
//! its fetch attempts fails the whole message, because a silently dropped
//! page could hide an entire range of discoverable ids behind an advanced
//! watermark.

use crate::config::Config;
use crate::fetch::{FetchError, FetchOutcome, FetchSession, RetryPolicy, RotationProvider};
use crate::pipeline::{blob_key, chunk_list, search_url, Budget, FailureReport, IdBatch, PageBatch, UnitError};
use crate::queue::{BatchQueue, QueueMessage};
use crate::store::{BlobStore, WatermarkStore};
use crate::Result;
use std::collections::BTreeMap;
use std::time::Duration;

/// Discovers newly appeared listing ids from page batches
pub struct DiscoveryWorker<'a> {
    config: &'a Config,
    queue: &'a dyn BatchQueue,
    blobs: &'a dyn BlobStore,
    watermarks: &'a dyn WatermarkStore,
    rotation: &'a dyn RotationProvider,
}

impl<'a> DiscoveryWorker<'a> {
    pub fn new(
        config: &'a Config,
        queue: &'a dyn BatchQueue,
        blobs: &'a dyn BlobStore,
        watermarks: &'a dyn WatermarkStore,
        rotation: &'a dyn RotationProvider,
    ) -> Self {
        Self {
            config,
            queue,
            blobs,
            watermarks,
            rotation,
        }
    }

    /// Processes a list of page-batch messages sequentially
    ///
    /// One fetch session is reused across all messages and released on every
    /// path. Each message commits or fails independently; only session
    /// acquisition is fatal for the whole invocation.
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
            "Discovery finished: {}/{} messages failed",
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
        let batch = PageBatch::from_json(&message.body)?;
        let category = &batch.transaction_type;

        tracing::info!(
            "Processing {} pages for {}, starting with page {:?}",
            batch.page_numbers.len(),
            category,
            batch.page_numbers.first()
        );

        let collected = self.collect_summaries(session, &batch).await?;

        if !collected.is_empty() {
            let key = blob_key("snapshots", category);
            let body = serde_json::to_vec_pretty(&collected)?;
            self.blobs.put(&key, &body)?;
            tracing::info!("Wrote {} listings to snapshot {}", collected.len(), key);
        }

        let watermark = self.watermarks.get(category)?;

        let Some(max_id) = collected.keys().next_back().copied() else {
            return Ok(());
        };

        let new_ids: Vec<i64> = collected
            .keys()
            .copied()
            .filter(|id| *id > watermark)
            .collect();

        if !new_ids.is_empty() {
            let forwarded = new_ids.len();
            for listing_ids in chunk_list(&new_ids, self.config.queues.id_batch_size) {
                let message = IdBatch {
                    transaction_type: category.clone(),
                    listing_ids,
                };
                self.queue
                    .send(&self.config.queues.id_batch_queue, &message.to_json()?)?;
            }
            tracing::info!("Forwarded {} new ids for {}", forwarded, category);
        }

        if max_id > watermark {
            self.watermarks.advance(category, max_id)?;
            tracing::info!("Advanced watermark for {} to {}", category, max_id);
        }

        Ok(())
    }

    /// Scrapes every page in the batch into one id -> summary map
    ///
    /// A later page overwrites an earlier one on id collision; the snapshot
    /// is a point-in-time view, not a merge. One exhausted page fails the
    /// entire batch.
    async fn collect_summaries(
        &self,
        session: &FetchSession<'_>,
        batch: &PageBatch,
    ) -> std::result::Result<BTreeMap<i64, serde_json::Value>, UnitError> {
        let policy = RetryPolicy::search(&self.config.fetch);
        let mut collected = BTreeMap::new();

        for page in &batch.page_numbers {
            let url = search_url(
                &self.config.upstream.base_url,
                &batch.transaction_type,
                *page,
            );

            let results = match session.fetch_json(&url, &policy).await {
                Ok(FetchOutcome::Body(mut body)) => match body.get_mut("results") {
                    Some(results) => match results.take() {
                        serde_json::Value::Array(items) => items,
                        _ => Vec::new(),
                    },
                    None => Vec::new(),
                },
                Ok(FetchOutcome::Unparseable) | Ok(FetchOutcome::Missing) => Vec::new(),
                Err(source @ FetchError::Exhausted { .. }) => {
                    return Err(UnitError::PageExhausted {
                        page: *page,
                        source,
                    });
                }
            };

            if results.is_empty() {
                tracing::warn!("No results on search page {}", page);
                continue;
            }

            for result in results {
                if let Some(id) = result.get("id").and_then(|v| v.as_i64()) {
                    collected.insert(id, result);
                }
            }
        }

        Ok(collected)
    }
}
