//! Process-wide outbound gate for provider calls.
//!
//! The provider enforces one quota for the whole client, not per handle, so a
//! single [`RateGovernor`] is shared (behind `Arc`) by every fetch.

use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tracing::trace;

/// Minimum-interval gate: at most one call is released per interval.
#[derive(Clone)]
pub struct RateGovernor {
    limiter: Option<Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
    interval: Duration,
}

impl RateGovernor {
    /// Create a gate releasing one call per `interval` (zero = unlimited).
    pub fn new(interval: Duration) -> Self {
        // Burst of one, so consecutive releases are spaced by the full interval.
        let limiter = Quota::with_period(interval).map(|quota| Arc::new(RateLimiter::direct(quota)));
        Self { limiter, interval }
    }

    /// A gate that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait for this caller's turn.
    pub async fn acquire(&self) {
        if let Some(ref limiter) = self.limiter {
            limiter.until_ready().await;
            trace!(interval_ms = self.interval.as_millis() as u64, "outbound call released");
        }
    }

    pub fn is_limited(&self) -> bool {
        self.limiter.is_some()
    }
}

impl std::fmt::Debug for RateGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGovernor")
            .field("interval", &self.interval)
            .field("limited", &self.is_limited())
            .finish()
    }
}
