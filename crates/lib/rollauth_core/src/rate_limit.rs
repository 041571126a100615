//! Fixed-window attempt limiter for the login and registration flows.
//!
//! Counters live in process memory, so limits apply per node.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Outcome of one attempt check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}

#[derive(Clone, Copy, Debug)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Checks between opportunistic prunes of expired windows.
const PRUNE_EVERY: u64 = 256;

/// Counts attempts per key inside fixed windows.
#[derive(Debug)]
pub struct RateLimiter {
    max_attempts: u32,
    window: Duration,
    windows: DashMap<String, Window>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            windows: DashMap::new(),
            checks: AtomicU64::new(0),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an attempt for `key` now.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Utc::now())
    }

    /// Record an attempt for `key` at `now`.
    ///
    /// A missing or elapsed window starts a new one with count 1. Inside a
    /// window the attempt is denied once the count has reached the ceiling;
    /// denied attempts do not extend the window.
    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.purge_expired_at(now);
        }

        match self.windows.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Window {
                    count: 1,
                    reset_at: now + self.window,
                });
                RateLimitDecision::Allowed
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                if now >= record.reset_at {
                    *record = Window {
                        count: 1,
                        reset_at: now + self.window,
                    };
                    RateLimitDecision::Allowed
                } else if record.count >= self.max_attempts {
                    RateLimitDecision::Limited {
                        retry_after: record.reset_at - now,
                    }
                } else {
                    record.count += 1;
                    RateLimitDecision::Allowed
                }
            }
        }
    }

    /// Forget the window of `key`.
    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    /// Drop windows that have elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| now < w.reset_at);
        before.saturating_sub(self.windows.len())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Whole seconds a client should wait, rounded up and never below 1.
pub fn retry_after_secs(retry_after: Duration) -> i64 {
    let millis = retry_after.num_milliseconds().max(0);
    ((millis + 999) / 1000).max(1)
}
