//! Token bucket implementation.

use std::time::Instant;

/// Clock resolution, in seconds.
///
/// `Instant` arithmetic is nanosecond-granular, so a wait of exactly
/// `1 / rate` seconds can land up to one nanosecond's worth of refill
/// short of a whole token.
const CLOCK_RESOLUTION_SECS: f64 = 1e-9;

/// A continuously refilled token bucket for a single identity.
///
/// Refill is computed lazily from the time elapsed since the last call, so
/// no timer is needed. The balance always stays within `[0, capacity]`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum number of tokens (burst size)
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Current balance
    tokens: f64,
    /// When the balance was last recomputed
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Try to take one token at `now`.
    ///
    /// Returns `true` if the request is admitted. A denied call leaves the
    /// refilled balance untouched.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens + self.refill_rate * CLOCK_RESOLUTION_SECS >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Current balance as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum number of tokens this bucket holds.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&mut self, now: Instant) {
        // A clock that went backwards refills nothing
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).clamp(0.0, self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}
