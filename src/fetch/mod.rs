//! Resilient fetch layer
//!
//! This module handles all HTTP traffic against the rate-limited upstream:
//! - Acquiring and releasing rotating egress contexts
//! - Building HTTP clients with desktop-like headers
//! - GET requests with retry, jittered backoff, and response-code policy

mod rotation;
mod session;

pub use rotation::{DirectEgress, RotationContext, RotationError, RotationProvider};
pub use session::{FetchError, FetchOutcome, FetchSession, RetryPolicy};
