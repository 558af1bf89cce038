//! Per-client token-bucket rate limiting
//!
//! One bucket per client key. Buckets refill continuously at the supplied
//! rate up to `burst` capacity; each admitted request costs one token. The
//! rate is passed per check because it is an operator setting that can
//! change at any time. Shared across tasks behind a `Mutex` since the
//! critical section is a handful of float operations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fallback wait when the configured rate is zero or negative
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allowed,
    /// Denied; the client should wait at least this long before retrying
    Limited { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

struct Bucket {
    tokens: f64,
    updated_at: Instant,
}

pub struct TokenBucketLimiter {
    burst: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    /// `burst` is the bucket capacity. A fresh bucket starts full, so a new
    /// client gets `burst` requests up front.
    pub fn new(burst: f64) -> Self {
        Self {
            burst: burst.max(1.0),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Charge one token against the bucket for `key`, refilling at `rate`
    /// tokens per second
    pub fn check(&self, key: &str, rate: f64) -> Decision {
        self.check_at(key, rate, Instant::now())
    }

    fn check_at(&self, key: &str, rate: f64, now: Instant) -> Decision {
        let mut buckets = self.buckets.lock().unwrap();

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            updated_at: now,
        });

        let elapsed = now.saturating_duration_since(bucket.updated_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate.max(0.0)).min(self.burst);
        bucket.updated_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Allowed
        } else {
            let retry_after = if rate > 0.0 {
                Duration::from_secs_f64((1.0 - bucket.tokens) / rate)
            } else {
                FALLBACK_RETRY_AFTER
            };
            Decision::Limited { retry_after }
        }
    }

    /// Drop buckets idle longer than `max_idle`, returning how many were
    /// removed. An evicted client simply starts over with a full bucket.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        self.sweep_idle_at(max_idle, Instant::now())
    }

    fn sweep_idle_at(&self, max_idle: Duration, now: Instant) -> usize {
        let mut buckets = self.buckets.lock().unwrap();
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.updated_at) <= max_idle);
        before - buckets.len()
    }
}
