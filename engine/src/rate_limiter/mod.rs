//! Rate limiting module
//!
//! A single fixed-interval throttle shared by every worker thread. Each
//! `acquire()` blocks until at least `1 / rps` has passed since the previous
//! grant, then records the new grant. There is no burst capacity: the first
//! call goes through immediately, every later one is spaced.
//!
//! The last-grant timestamp lives behind one mutex that is held across the
//! sleep, so waiting callers queue up behind each other and two grants can
//! never land closer than the interval.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

/// Shared outbound request throttle
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last_grant: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter granting at most `rps` acquisitions per second.
    ///
    /// `rps <= 0` (or a non-finite value) disables throttling.
    pub fn new(rps: f64) -> Self {
        let interval = if rps.is_finite() && rps > 0.0 {
            Duration::from_secs_f64(1.0 / rps)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            last_grant: Mutex::new(None),
        }
    }

    /// Limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    /// Minimum spacing between two grants
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Block until the next slot is free and claim it.
    ///
    /// Returns the instant the slot was granted.
    pub fn acquire(&self) -> Instant {
        // A poisoned lock still holds a valid timestamp
        let mut last = self
            .last_grant
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            let now = Instant::now();
            if ready_at > now {
                let wait = ready_at - now;
                trace!("Rate limiter waiting {:?}", wait);
                std::thread::sleep(wait);
            }
        }

        let granted = Instant::now();
        *last = Some(granted);
        granted
    }
}
