//! Token-bucket state and the refill/consume step shared by every limiter.
//!
//! The arithmetic is pure: callers sample the clock once and pass `now` through,
//! so a local bucket, the in-memory store and the Lua script all compute the same
//! answer for the same inputs.

use crate::error::ConfigError;

/// Validated deployment-wide tunables.
///
/// Hold one value per deployment; changing it between calls changes what a quota means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    capacity: f64,
    refill_rate: f64,
}

impl BucketConfig {
    /// Create tunables, rejecting `capacity <= 0`, `refill_rate < 0` and non-finite values.
    ///
    /// # Examples
    /// ```
    /// use tollgate::BucketConfig;
    /// let cfg = BucketConfig::new(5.0, 1.0).unwrap();
    /// assert_eq!(cfg.capacity(), 5.0);
    /// assert!(BucketConfig::new(0.0, 1.0).is_err());
    /// ```
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self, ConfigError> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        if !refill_rate.is_finite() || refill_rate < 0.0 {
            return Err(ConfigError::InvalidRefillRate(refill_rate));
        }
        Ok(Self { capacity, refill_rate })
    }

    /// Maximum burst size.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second of elapsed time.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

/// Per-identifier bucket record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Tokens available, `0 <= tokens <= capacity`.
    pub tokens: f64,
    /// Seconds since the UNIX epoch of the last recomputation.
    pub last_refill: f64,
}

impl BucketState {
    /// First-sight state: a full bucket stamped at `now`.
    pub fn full(config: &BucketConfig, now: f64) -> Self {
        Self { tokens: config.capacity, last_refill: now }
    }

    /// Token count as of `now`, without consuming anything.
    ///
    /// Elapsed time is clamped at zero, so a clock that moved backwards adds nothing.
    pub fn refilled(&self, config: &BucketConfig, now: f64) -> f64 {
        let elapsed = (now - self.last_refill).max(0.0);
        (self.tokens + elapsed * config.refill_rate).min(config.capacity)
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Tokens left after this check.
    pub remaining: f64,
}

impl Admission {
    /// An admitted request with `remaining` tokens left.
    pub fn admit(remaining: f64) -> Self {
        Self { allowed: true, remaining }
    }

    /// A refused request with `remaining` tokens left.
    pub fn reject(remaining: f64) -> Self {
        Self { allowed: false, remaining }
    }
}

/// Refill `state` up to `now`, then try to take one token.
///
/// `None` is the first observation of an identifier and starts from a full bucket.
/// The returned state must replace the stored one.
pub fn refill_and_consume(
    state: Option<BucketState>,
    config: &BucketConfig,
    now: f64,
) -> (BucketState, Admission) {
    let state = state.unwrap_or_else(|| BucketState::full(config, now));
    let tokens = state.refilled(config, now);
    // Keep the later stamp so a skewed clock cannot replay elapsed time.
    let last_refill = state.last_refill.max(now);

    if tokens >= 1.0 {
        let remaining = tokens - 1.0;
        (BucketState { tokens: remaining, last_refill }, Admission::admit(remaining))
    } else {
        (BucketState { tokens, last_refill }, Admission::reject(tokens))
    }
}
