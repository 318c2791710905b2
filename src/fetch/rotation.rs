//! Egress rotation seam
//!
//! The upstream rate-limits per source IP, so every fetch session runs behind
//! a rotating network identity. The mechanics of standing that identity up
//! (API gateways, proxies, ...) are not this crate's concern; the pipeline
//! only acquires an opaque context bound to one region and releases it on
//! every exit path.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Errors from the rotation provider
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("Failed to acquire egress context in {region}: {message}")]
    Acquire { region: String, message: String },

    #[error("Failed to release egress context {id}: {message}")]
    Release { id: u64, message: String },
}

/// An opaque handle on one acquired egress identity
///
/// The context is bound to a single region for its whole lifetime; rotating
/// means releasing it and acquiring a fresh one.
#[derive(Debug)]
pub struct RotationContext {
    /// Provider-assigned handle, used for release and logging
    pub id: u64,

    /// Region this identity egresses from
    pub region: String,
}

/// Provider of rotating egress identities
#[async_trait]
pub trait RotationProvider: Send + Sync {
    /// Acquires an egress context bound to the given region
    async fn open(&self, region: &str) -> Result<RotationContext, RotationError>;

    /// Releases a previously acquired context
    async fn close(&self, context: RotationContext) -> Result<(), RotationError>;
}

/// Rotation provider that egresses directly from the local host
///
/// Used for local runs and tests. Contexts are handed out immediately and
/// release is a no-op beyond logging; the region is recorded but has no
/// network effect.
#[derive(Debug, Default)]
pub struct DirectEgress {
    next_id: AtomicU64,
}

impl DirectEgress {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RotationProvider for DirectEgress {
    async fn open(&self, region: &str) -> Result<RotationContext, RotationError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Opened direct egress context {} (region {})", id, region);
        Ok(RotationContext {
            id,
            region: region.to_string(),
        })
    }

    async fn close(&self, context: RotationContext) -> Result<(), RotationError> {
        tracing::debug!(
            "Closed direct egress context {} (region {})",
            context.id,
            context.region
        );
        Ok(())
    }
}
