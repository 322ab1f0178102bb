use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Burst capacity multiplier applied when no explicit burst is configured.
pub const BURST_MULTIPLIER: f64 = 2.0;
const TOKEN_COST: f64 = 1.0;
const MIN_WAIT: Duration = Duration::from_micros(50);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Admissions per second; zero or negative disables limiting.
    pub target_rps: f64,
    /// Bucket capacity; zero or negative derives it from `target_rps`.
    pub burst_size: f64,
}

impl RateLimiterConfig {
    #[must_use]
    pub const fn new(target_rps: f64, burst_size: f64) -> Self {
        Self {
            target_rps,
            burst_size,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.target_rps.is_finite() && self.target_rps > 0.0
    }

    /// Capacity actually used by the bucket.
    #[must_use]
    pub fn effective_burst(&self) -> f64 {
        if !self.enabled() {
            return 0.0;
        }
        let burst = if self.burst_size.is_finite() && self.burst_size > 0.0 {
            self.burst_size
        } else {
            self.target_rps * BURST_MULTIPLIER
        };
        burst.max(TOKEN_COST)
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, rate: f64, capacity: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = elapsed.mul_add(rate, self.tokens).min(capacity);
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, rate: f64, capacity: f64) -> bool {
        self.refill(rate, capacity, Instant::now());
        if self.tokens >= TOKEN_COST {
            self.tokens -= TOKEN_COST;
            true
        } else {
            false
        }
    }

    fn wait_time(&self, rate: f64) -> Duration {
        let missing = TOKEN_COST - self.tokens;
        if missing <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(missing / rate)
            .unwrap_or(MIN_WAIT)
            .max(MIN_WAIT)
    }
}

/// Token-bucket limiter. The bucket starts full.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    capacity: f64,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = config.effective_burst();
        Self {
            config,
            capacity,
            bucket: Mutex::new(TokenBucket::full(capacity)),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(RateLimiterConfig::default())
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled()
    }

    #[must_use]
    pub const fn burst_size(&self) -> f64 {
        self.capacity
    }

    /// Blocks the calling thread until a token is available, then consumes it.
    ///
    /// Sleeps between attempts with the lock released. Meant for dispatcher
    /// threads, never for an event loop worker.
    pub fn acquire(&self) {
        if !self.is_enabled() {
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.lock_bucket();
                if bucket.try_take(self.config.target_rps, self.capacity) {
                    return;
                }
                bucket.wait_time(self.config.target_rps)
            };
            std::thread::sleep(wait);
        }
    }

    /// Consumes a token if one is available, without waiting.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        if !self.is_enabled() {
            return true;
        }
        self.lock_bucket()
            .try_take(self.config.target_rps, self.capacity)
    }

    /// Same as [`RateLimiter::try_acquire`] for a caller that owns the limiter.
    #[must_use]
    pub fn try_acquire_unlocked(&mut self) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let rate = self.config.target_rps;
        let capacity = self.capacity;
        self.bucket
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .try_take(rate, capacity)
    }

    /// Refills the bucket to its full burst.
    pub fn reset(&self) {
        *self.lock_bucket() = TokenBucket::full(self.capacity);
    }

    #[must_use]
    pub fn available_tokens(&self) -> f64 {
        if !self.is_enabled() {
            return 0.0;
        }
        let mut bucket = self.lock_bucket();
        bucket.refill(self.config.target_rps, self.capacity, Instant::now());
        bucket.tokens
    }

    /// Time until the next token is available; zero when one is available now.
    #[must_use]
    pub fn time_until_available(&self) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }
        let mut bucket = self.lock_bucket();
        bucket.refill(self.config.target_rps, self.capacity, Instant::now());
        bucket.wait_time(self.config.target_rps)
    }

    fn lock_bucket(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::disabled()
    }
}
