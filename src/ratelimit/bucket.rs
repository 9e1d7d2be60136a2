//! Token bucket implementation.

use std::time::Instant;

use crate::error::{Result, TollgateError};

/// Refill rate and burst size shared by every bucket of a store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    /// Tokens added per second
    refill_rate: f64,
    /// Maximum number of tokens, i.e. the burst size
    capacity: u32,
}

impl BucketConfig {
    /// Create a validated bucket configuration.
    ///
    /// The rate must be finite and non-negative; a rate of zero admits
    /// nothing. The capacity must be at least one.
    pub fn new(refill_rate: f64, capacity: u32) -> Result<Self> {
        if !refill_rate.is_finite() || refill_rate < 0.0 {
            return Err(TollgateError::Config(format!(
                "refill rate must be a finite, non-negative number of tokens per second, got {}",
                refill_rate
            )));
        }
        if capacity == 0 {
            return Err(TollgateError::Config(
                "bucket capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            refill_rate,
            capacity,
        })
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Burst size.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// A lazily refilled token bucket.
///
/// Tokens are topped up from the elapsed time on each call instead of by a
/// timer, so the decision only depends on the instants passed in. Fractional
/// tokens carry over between calls.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Current fill level, `0 <= tokens <= capacity`
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    /// When tokens were last topped up
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: BucketConfig, now: Instant) -> Self {
        let capacity = f64::from(config.capacity);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: config.refill_rate,
            last_refill: now,
        }
    }

    /// Refill for the time elapsed up to `now`, then try to take one token.
    ///
    /// Returns `true` if a token was taken. A denied call leaves the fill
    /// level untouched apart from the refill.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        // A zero rate never admits, not even the initial burst.
        if self.refill_rate == 0.0 {
            return false;
        }

        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// The fill level as of `now`, without consuming anything.
    pub fn tokens_at(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// The fill level as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Maximum number of tokens.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&mut self, now: Instant) {
        // Callers may sample `now` before acquiring the bucket, so an instant
        // older than the last refill counts as no time passing.
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}
