//! Wall-clock abstraction used by the limiters.
//!
//! Bucket timestamps are seconds since the UNIX epoch as `f64`, the same unit the
//! distributed store persists, so local and shared buckets agree on arithmetic.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
///
/// Limiters sample the clock exactly once per admission check.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in seconds since the UNIX epoch.
    fn now_secs(&self) -> f64;
}

/// Wall clock backed by `SystemTime::now()`.
///
/// Distributed deployments rely on loosely synchronized wall clocks across processes;
/// a monotonic clock would not be comparable between hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
    }
}

/// Manually driven clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    /// Start the clock at `start` seconds.
    pub fn new(start: f64) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by.as_secs_f64();
    }

    /// Jump to an absolute time, including into the past.
    pub fn set(&self, secs: f64) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = secs;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_000.0)
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
