//! Dispatcher stage
//!
//! For each configured category: probe page 1 for the total item count, turn
//! the full page range into fixed-size batches, and enqueue one PageBatch
//! message per chunk. Dispatch is not incremental; a category skipped here
//! (failure or budget stop) is simply recomputed in full on the next
//! scheduled run.

use crate::config::Config;
use crate::fetch::{FetchError, FetchOutcome, FetchSession, RetryPolicy, RotationProvider};
use crate::pipeline::{chunk_list, search_url, Budget, PageBatch};
use crate::queue::BatchQueue;
use crate::Result;
use std::time::Duration;

/// Outcome of one dispatcher invocation
#[derive(Debug, Default)]
pub struct DispatchSummary {
    /// Categories whose page batches were fully enqueued
    pub categories_dispatched: usize,

    /// Categories skipped on failure or left for the next run by the budget stop
    pub categories_skipped: usize,

    /// Total PageBatch messages sent
    pub messages_sent: usize,
}

/// Plans the pagination workload for every configured category
pub struct Dispatcher<'a> {
    config: &'a Config,
    queue: &'a dyn BatchQueue,
    rotation: &'a dyn RotationProvider,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        config: &'a Config,
        queue: &'a dyn BatchQueue,
        rotation: &'a dyn RotationProvider,
    ) -> Self {
        Self {
            config,
            queue,
            rotation,
        }
    }

    /// Dispatches page batches for every category within the time budget
    ///
    /// Per-category failures are logged and skipped; every acquired fetch
    /// session is released whatever the category's outcome.
    pub async fn run(&self, budget: &Budget) -> Result<DispatchSummary> {
        let reserve = Duration::from_millis(self.config.budget.category_reserve_ms);
        let mut summary = DispatchSummary::default();

        for category in &self.config.upstream.categories {
            if budget.is_below(reserve) {
                tracing::warn!(
                    "Approaching deadline, leaving '{}' and later categories for the next run",
                    category
                );
                summary.categories_skipped +=
                    self.config.upstream.categories.len() - summary.categories_dispatched;
                break;
            }

            tracing::info!("Dispatching category {}", category);
            match self.dispatch_category(category, budget).await {
                Ok(sent) => {
                    summary.categories_dispatched += 1;
                    summary.messages_sent += sent;
                }
                Err(e) => {
                    tracing::error!("Failed to dispatch {}: {}", category, e);
                    summary.categories_skipped += 1;
                }
            }
        }

        tracing::info!(
            "Dispatch finished: {} categories, {} messages, {} skipped",
            summary.categories_dispatched,
            summary.messages_sent,
            summary.categories_skipped
        );
        Ok(summary)
    }

    /// Dispatches one category with a dedicated session, released on every path
    async fn dispatch_category(&self, category: &str, budget: &Budget) -> Result<usize> {
        let mut session = FetchSession::acquire(self.rotation, &self.config.fetch).await?;
        let result = self.enqueue_page_range(&mut session, category, budget).await;
        session.close().await;
        result
    }

    async fn enqueue_page_range(
        &self,
        session: &mut FetchSession<'_>,
        category: &str,
        budget: &Budget,
    ) -> Result<usize> {
        let pages = self.total_pages(session, category, budget).await?;
        tracing::info!("Found {} pages for {}", pages, category);

        let page_numbers: Vec<u32> = (1..=pages).collect();
        let batches = chunk_list(&page_numbers, self.config.queues.page_batch_size);
        let count = batches.len();

        for page_numbers in batches {
            let message = PageBatch {
                transaction_type: category.to_string(),
                page_numbers,
            };
            self.queue
                .send(&self.config.queues.page_batch_queue, &message.to_json()?)?;
        }

        tracing::info!("Sent {} page batches for {}", count, category);
        Ok(count)
    }

    /// Determines the total page count for a category from page 1
    ///
    /// A failed probe releases the whole egress identity and retries with a
    /// fresh one; rotations are unbounded, gated only by the time budget.
    async fn total_pages(
        &self,
        session: &mut FetchSession<'_>,
        category: &str,
        budget: &Budget,
    ) -> Result<u32> {
        let url = search_url(&self.config.upstream.base_url, category, 1);
        let policy = RetryPolicy::probe(&self.config.fetch);
        let reserve = Duration::from_millis(self.config.budget.category_reserve_ms);
        let mut rotations: u32 = 0;

        let total_items = loop {
            if budget.is_below(reserve) {
                tracing::error!("Out of budget probing {} after {} rotations", url, rotations);
                return Err(FetchError::Exhausted {
                    url,
                    attempts: rotations,
                }
                .into());
            }

            match session.fetch_json(&url, &policy).await {
                Ok(FetchOutcome::Body(body)) => match body.get("totalItems").and_then(|v| v.as_u64()) {
                    Some(total) => break total as u32,
                    None => {
                        tracing::warn!(
                            "totalItems missing from {}, falling back to {}. Response: {}",
                            url,
                            self.config.upstream.default_total_items,
                            body
                        );
                        break self.config.upstream.default_total_items;
                    }
                },
                Ok(FetchOutcome::Unparseable) => {
                    tracing::warn!(
                        "Unparseable body from {}, falling back to {} total items",
                        url,
                        self.config.upstream.default_total_items
                    );
                    break self.config.upstream.default_total_items;
                }
                Ok(FetchOutcome::Missing) | Err(FetchError::Exhausted { .. }) => {
                    rotations += 1;
                    tracing::warn!(
                        "Probe {} failed from region {:?} (rotation {}), rotating egress",
                        url,
                        session.region(),
                        rotations
                    );
                    session.rotate().await?;
                }
            }
        };

        Ok(total_items / self.config.upstream.items_per_page + 1)
    }
}
