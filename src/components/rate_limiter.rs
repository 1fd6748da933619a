//! Keyed token bucket rate limiter.
//!
//! Shared across concurrent requests as a component; the rate-limit policy
//! acquires one token per request under a caller-chosen bucket key (API key,
//! client, or API coordinates).

use dashmap::DashMap;
use std::time::Instant;
use tokio::sync::Mutex;

/// Token bucket rate limiter with one independent bucket per key.
///
/// Tokens accumulate at the configured rate per second up to the bucket
/// capacity; each `try_acquire` consumes one token. The limiter never
/// waits: the caller converts an empty bucket into a policy rejection.
#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Mutex<Bucket>>,
}

struct Bucket {
    /// Current number of tokens
    tokens: f64,
    /// Maximum tokens (bucket capacity)
    max_tokens: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Last time tokens were refilled
    last_refill: Instant,
}

impl Bucket {
    fn new(rate_per_second: f64) -> Self {
        Self {
            tokens: rate_per_second, // Start with full bucket
            max_tokens: rate_per_second,
            refill_rate: rate_per_second,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens += elapsed.as_secs_f64() * self.refill_rate;
        self.tokens = self.tokens.min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to take one token from the bucket for `key`, creating the
    /// bucket at `rate_per_second` on first use.
    ///
    /// Returns `false` when the bucket is empty. Changing the rate for an
    /// existing key has no effect until the bucket is dropped.
    pub async fn try_acquire(&self, key: &str, rate_per_second: f64) -> bool {
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(rate_per_second)));
        let mut bucket = bucket.lock().await;
        bucket.try_acquire()
    }
}
