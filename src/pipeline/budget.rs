//! Invocation time budget
//!
//! Cancellation in this pipeline is cooperative and coarse: before starting a
//! unit of work (a category, a message) the component checks the remaining
//! budget against a reserve and skips or preemptively fails rather than
//! beginning work it cannot finish. There is no mid-fetch cancellation.

use crate::config::BudgetConfig;
use std::time::{Duration, Instant};

/// Wall-clock budget for one invocation
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    deadline: Instant,
}

impl Budget {
    /// Starts a budget of the given total duration, ticking from now
    pub fn new(total: Duration) -> Self {
        Self {
            deadline: Instant::now() + total,
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(Duration::from_millis(config.invocation_ms))
    }

    /// Time left before the deadline; zero once past it
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the remaining budget has dropped below the given reserve
    pub fn is_below(&self, reserve: Duration) -> bool {
        self.remaining() < reserve
    }
}
