use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::engine::StopSignal;

/// Spaces out catalog requests so that two permitted calls are always at least
/// `interval` apart. Only the last permitted call is remembered.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Wait for the next request slot.
    ///
    /// Returns `false` when a stop was requested before the slot was reached; the
    /// caller must not issue its request in that case. The slot is only consumed
    /// when `true` is returned.
    pub(crate) async fn throttle(&mut self, stop: &StopSignal) -> bool {
        if stop.is_requested() {
            debug!("rate limiter: stop requested, not issuing request");
            return false;
        }

        let Some(last) = self.last else {
            debug!("rate limiter: first request");
            self.last = Some(Instant::now());
            return true;
        };

        let elapsed = last.elapsed();
        if elapsed >= self.interval {
            debug!(?elapsed, "rate limiter: last request is old enough, not waiting");
            self.last = Some(Instant::now());
            return true;
        }

        let wait = self.interval - elapsed;
        debug!(?elapsed, ?wait, "rate limiter: waiting");
        tokio::select! {
            biased;
            _ = stop.wait() => {
                debug!("rate limiter: stop requested while waiting");
                false
            }
            _ = tokio::time::sleep_until(last + self.interval) => {
                self.last = Some(Instant::now());
                true
            }
        }
    }
}
