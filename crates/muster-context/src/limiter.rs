//! Token-bucket rate limiter.
//!
//! Bounds how many jobs a round may admit, globally and per queue. A
//! reservation always succeeds and may drive the balance negative;
//! admission gates read the balance and refuse new work while it is
//! exhausted. Cheap to clone and safe to consume from several
//! components at once.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

/// Shared token bucket with a refill rate and a burst capacity.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    rate_per_second: f64,
    burst: f64,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// A limiter that starts full.
    pub fn new(rate_per_second: f64, burst: f64) -> Self {
        Self {
            rate_per_second,
            burst,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: burst,
                updated: Instant::now(),
            })),
        }
    }

    /// Reserve `n` tokens as of `at`. Never fails; the balance may go
    /// negative, in which case callers of `tokens_at` see exhaustion
    /// until the bucket refills.
    pub fn reserve_n(&self, at: Instant, n: usize) {
        let mut bucket = self.bucket.lock();
        Self::refill(&mut bucket, at, self.rate_per_second, self.burst);
        bucket.tokens -= n as f64;
    }

    /// Token balance as of `at`.
    pub fn tokens_at(&self, at: Instant) -> f64 {
        let mut bucket = self.bucket.lock();
        Self::refill(&mut bucket, at, self.rate_per_second, self.burst);
        bucket.tokens
    }

    fn refill(bucket: &mut Bucket, at: Instant, rate: f64, burst: f64) {
        // `at` may predate the last update (round timestamps are fixed
        // at round start); time never runs backwards here.
        let elapsed = at.saturating_duration_since(bucket.updated);
        if elapsed.is_zero() {
            return;
        }
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * rate).min(burst);
        bucket.updated = at;
    }
}
