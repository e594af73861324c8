//! In-process limiter: one bucket per identifier, held in memory.
//!
//! The registry lock only guards map structure. Arithmetic runs under the
//! per-bucket mutex, so distinct identifiers never wait on each other's checks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::bucket::{refill_and_consume, Admission, BucketConfig, BucketState};
use crate::clock::{Clock, SystemClock};
use crate::rate_limit::RateLimiter;

type BucketHandle = Arc<Mutex<BucketState>>;

/// Token-bucket limiter keyed by identifier, backed by process memory.
///
/// Clones share the same registry, so a clone handed to a sweeper task or another
/// service observes and affects the same buckets.
///
/// # Examples
/// ```
/// use tollgate::{BucketConfig, LocalRateLimiter};
/// let limiter = LocalRateLimiter::new(BucketConfig::new(2.0, 1.0).unwrap());
/// assert!(limiter.allow("10.0.0.1").allowed);
/// assert!(limiter.allow("10.0.0.1").allowed);
/// assert!(!limiter.allow("10.0.0.1").allowed);
/// assert!(limiter.allow("10.0.0.2").allowed);
/// ```
#[derive(Debug, Clone)]
pub struct LocalRateLimiter {
    buckets: Arc<RwLock<HashMap<String, BucketHandle>>>,
    config: BucketConfig,
    clock: Arc<dyn Clock>,
}

impl LocalRateLimiter {
    /// Create an empty limiter using the wall clock.
    pub fn new(config: BucketConfig) -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Tunables shared by every bucket.
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Refill and try to consume one token for `identifier`.
    ///
    /// Creates a full bucket on first sight. Never fails.
    pub fn allow(&self, identifier: &str) -> Admission {
        let now = self.clock.now_secs();
        let handle = self.bucket(identifier, now);

        let admission = {
            let mut state = handle.lock().unwrap_or_else(PoisonError::into_inner);
            let (next, admission) = refill_and_consume(Some(*state), &self.config, now);
            *state = next;
            admission
        };

        debug!(
            target: "tollgate::local",
            identifier,
            allowed = admission.allowed,
            remaining = admission.remaining,
            "admission checked"
        );
        admission
    }

    /// Tokens `identifier` would have right now, without consuming one.
    ///
    /// `None` if the identifier has never been seen (or was evicted).
    pub fn peek(&self, identifier: &str) -> Option<f64> {
        let now = self.clock.now_secs();
        let handle = self.read_buckets().get(identifier).cloned()?;
        let state = handle.lock().unwrap_or_else(PoisonError::into_inner);
        Some(state.refilled(&self.config, now))
    }

    /// Number of identifiers currently tracked.
    pub fn len(&self) -> usize {
        self.read_buckets().len()
    }

    /// True if no identifier is tracked.
    pub fn is_empty(&self) -> bool {
        self.read_buckets().is_empty()
    }

    /// Drop buckets untouched for at least `max_idle` that have refilled to capacity.
    ///
    /// A forgotten bucket comes back full on the next request, so only buckets that
    /// are already full are removed; eviction never hands out extra burst. With a
    /// zero refill rate a drained bucket is therefore kept forever. Buckets held by
    /// an in-flight [`allow`](Self::allow) are skipped. Returns the number removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = self.clock.now_secs();
        let cutoff = now - max_idle.as_secs_f64();
        let capacity = self.config.capacity();

        let mut map = self.write_buckets();
        let before = map.len();
        map.retain(|_, handle| {
            // Handles are only cloned under the registry lock, which we hold exclusively.
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            let state = handle.lock().unwrap_or_else(PoisonError::into_inner);
            state.last_refill > cutoff || state.refilled(&self.config, now) < capacity
        });
        before - map.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) every `every` on the Tokio runtime.
    ///
    /// Must be called from within a Tokio runtime. The task stops when the returned
    /// handle is dropped or shut down.
    pub fn spawn_idle_sweeper(&self, every: Duration, max_idle: Duration) -> SweeperHandle {
        let limiter = self.clone();
        let every = every.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can be idle yet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = limiter.evict_idle(max_idle);
                if evicted > 0 {
                    debug!(
                        target: "tollgate::sweeper",
                        evicted,
                        tracked = limiter.len(),
                        "evicted idle buckets"
                    );
                }
            }
        });
        info!(target: "tollgate::sweeper", ?every, ?max_idle, "idle bucket sweeper started");
        SweeperHandle { task }
    }

    fn bucket(&self, identifier: &str, now: f64) -> BucketHandle {
        if let Some(handle) = self.read_buckets().get(identifier) {
            return handle.clone();
        }
        // Re-check under the write lock: a concurrent first request may have won.
        let mut map = self.write_buckets();
        map.entry(identifier.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(BucketState::full(&self.config, now))))
            .clone()
    }

    fn read_buckets(&self) -> RwLockReadGuard<'_, HashMap<String, BucketHandle>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_buckets(&self) -> RwLockWriteGuard<'_, HashMap<String, BucketHandle>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn allow(&self, identifier: &str) -> Admission {
        LocalRateLimiter::allow(self, identifier)
    }

    fn limit(&self) -> f64 {
        self.config.capacity()
    }
}

/// Handle to a running idle sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper.
    pub fn shutdown(self) {
        // Drop aborts the task.
    }

    /// True once the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
        debug!(target: "tollgate::sweeper", "idle bucket sweeper stopped");
    }
}
