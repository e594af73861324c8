//! Store-backed limiter shared by many processes.
//!
//! The limiter itself is stateless: every check is one atomic execution against an
//! [`AtomicBucketStore`], bounded by a request deadline. Any store failure resolves
//! through the configured [`FailurePolicy`] instead of surfacing as an error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::adaptive::DynamicConfig;
use crate::bucket::{Admission, BucketConfig};
use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, StoreError};
use crate::rate_limit::store::{decode_reply, AtomicBucketStore, ScriptRequest};
use crate::rate_limit::{FailurePolicy, RateLimiter};
use crate::telemetry::{emit_best_effort, AdmissionEvent, NullSink, TelemetrySink};

/// Validated configuration for [`DistributedRateLimiter`].
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedConfig {
    tunables: BucketConfig,
    key_prefix: String,
    idle_ttl: Duration,
    deadline: Duration,
    failure_policy: FailurePolicy,
}

impl DistributedConfig {
    /// Namespace prepended to every identifier.
    pub const DEFAULT_KEY_PREFIX: &'static str = "rate_limit";
    /// Idle buckets are forgotten by the store after this long.
    pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60);
    /// Longest a single check waits on the store.
    pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(250);

    /// Defaults for everything but the tunables.
    pub fn new(tunables: BucketConfig) -> Self {
        Self {
            tunables,
            key_prefix: Self::DEFAULT_KEY_PREFIX.to_string(),
            idle_ttl: Self::DEFAULT_IDLE_TTL,
            deadline: Self::DEFAULT_DEADLINE,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Start a builder seeded with defaults.
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use tollgate::{BucketConfig, DistributedConfig, FailurePolicy};
    /// let cfg = DistributedConfig::builder(BucketConfig::new(5.0, 1.0).unwrap())
    ///     .key_prefix("api")
    ///     .deadline(Duration::from_millis(50))
    ///     .failure_policy(FailurePolicy::FailOpen)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(cfg.key_for("10.0.0.1"), "api:10.0.0.1");
    /// ```
    pub fn builder(tunables: BucketConfig) -> DistributedConfigBuilder {
        DistributedConfigBuilder { config: Self::new(tunables) }
    }

    /// Deployment-wide tunables.
    pub fn tunables(&self) -> &BucketConfig {
        &self.tunables
    }

    /// Key namespace.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Idle expiry re-armed on every write.
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Per-check store deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Initial failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Store key for `identifier`.
    pub fn key_for(&self, identifier: &str) -> String {
        format!("{}:{}", self.key_prefix, identifier)
    }
}

/// Builder for [`DistributedConfig`]; values are checked in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct DistributedConfigBuilder {
    config: DistributedConfig,
}

impl DistributedConfigBuilder {
    /// Namespace for store keys; a trailing `:` is stripped.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Idle expiry, at least one second.
    pub fn idle_ttl(mut self, ttl: Duration) -> Self {
        self.config.idle_ttl = ttl;
        self
    }

    /// Store deadline, non-zero.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = deadline;
        self
    }

    /// What to answer when the store is degraded.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<DistributedConfig, ConfigError> {
        let mut config = self.config;
        let prefix = config.key_prefix.trim().trim_end_matches(':').to_string();
        if prefix.is_empty() || prefix.chars().any(|c| c.is_control()) {
            return Err(ConfigError::InvalidKeyPrefix(config.key_prefix));
        }
        config.key_prefix = prefix;

        if config.idle_ttl < Duration::from_secs(1) {
            return Err(ConfigError::InvalidIdleTtl(config.idle_ttl));
        }
        if config.deadline.is_zero() {
            return Err(ConfigError::InvalidDeadline(config.deadline));
        }
        Ok(config)
    }
}

/// Token-bucket limiter whose buckets live in a shared store.
///
/// Clones share the store, the clock, and the failure-policy handle.
///
/// # Examples
/// ```
/// use tollgate::{BucketConfig, DistributedConfig, DistributedRateLimiter, InMemoryBucketStore};
///
/// # #[tokio::main]
/// # async fn main() {
/// let config = DistributedConfig::new(BucketConfig::new(1.0, 1.0).unwrap());
/// let limiter = DistributedRateLimiter::new(InMemoryBucketStore::new(), config);
/// assert!(limiter.allow("10.0.0.1").await.allowed);
/// assert!(!limiter.allow("10.0.0.1").await.allowed);
/// # }
/// ```
pub struct DistributedRateLimiter<S, K = NullSink> {
    store: Arc<S>,
    config: DistributedConfig,
    failure_policy: DynamicConfig<FailurePolicy>,
    clock: Arc<dyn Clock>,
    sink: K,
}

impl<S, K: Clone> Clone for DistributedRateLimiter<S, K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            failure_policy: self.failure_policy.clone(),
            clock: self.clock.clone(),
            sink: self.sink.clone(),
        }
    }
}

impl<S, K> fmt::Debug for DistributedRateLimiter<S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedRateLimiter")
            .field("config", &self.config)
            .field("failure_policy", &self.failure_policy.load())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<S> DistributedRateLimiter<S, NullSink>
where
    S: AtomicBucketStore + 'static,
{
    /// Create a limiter over `store`.
    pub fn new(store: S, config: DistributedConfig) -> Self {
        let failure_policy = DynamicConfig::new(config.failure_policy);
        Self { store: Arc::new(store), config, failure_policy, clock: Arc::new(SystemClock), sink: NullSink }
    }
}

impl<S, K> DistributedRateLimiter<S, K>
where
    S: AtomicBucketStore + 'static,
    K: TelemetrySink,
    K::Future: Send + 'static,
{
    /// Send an [`AdmissionEvent`] per check to `sink`.
    pub fn with_sink<K2>(self, sink: K2) -> DistributedRateLimiter<S, K2>
    where
        K2: TelemetrySink,
    {
        DistributedRateLimiter {
            store: self.store,
            config: self.config,
            failure_policy: self.failure_policy,
            clock: self.clock,
            sink,
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &DistributedConfig {
        &self.config
    }

    /// Live handle to the failure policy; `set` takes effect on the next check.
    pub fn failure_policy(&self) -> DynamicConfig<FailurePolicy> {
        self.failure_policy.clone()
    }

    /// Check `identifier` against the configured tunables.
    pub async fn allow(&self, identifier: &str) -> Admission {
        let tunables = self.config.tunables;
        self.allow_with(identifier, &tunables).await
    }

    /// Check `identifier` with explicit tunables.
    ///
    /// Pass the same tunables on every call for a deployment; the store keeps only
    /// the token count, so changing capacity between calls changes what it means.
    pub async fn allow_with(&self, identifier: &str, tunables: &BucketConfig) -> Admission {
        let key = self.config.key_for(identifier);
        let now = self.clock.now_secs();
        let request =
            ScriptRequest { key: &key, tunables: *tunables, now, idle_ttl: self.config.idle_ttl };

        let outcome =
            match tokio::time::timeout(self.config.deadline, self.store.execute(request)).await {
                Ok(Ok(reply)) => decode_reply(reply),
                Ok(Err(error)) => Err(error),
                Err(_) => Err(StoreError::Timeout(self.config.deadline)),
            };

        match outcome {
            Ok(admission) => {
                debug!(
                    target: "tollgate::distributed",
                    key = %key,
                    allowed = admission.allowed,
                    remaining = admission.remaining,
                    "admission checked"
                );
                let event = if admission.allowed {
                    AdmissionEvent::Admitted { key, remaining: admission.remaining }
                } else {
                    AdmissionEvent::Rejected { key, remaining: admission.remaining }
                };
                self.emit(event).await;
                admission
            }
            Err(error) => {
                let policy = self.failure_policy.load();
                warn!(
                    target: "tollgate::distributed",
                    key = %key,
                    error = %error,
                    policy = ?policy,
                    "bucket store failed; applying failure policy"
                );
                self.emit(AdmissionEvent::BackendFailure { key, error, policy }).await;
                policy.degraded_admission()
            }
        }
    }

    // A sink gets at most one more deadline; a stalled one must not hold the request.
    async fn emit(&self, event: AdmissionEvent) {
        let emit = emit_best_effort(self.sink.clone(), event);
        if tokio::time::timeout(self.config.deadline, emit).await.is_err() {
            debug!(target: "tollgate::distributed", "telemetry sink timed out; event dropped");
        }
    }
}

#[async_trait::async_trait]
impl<S, K> RateLimiter for DistributedRateLimiter<S, K>
where
    S: AtomicBucketStore + 'static,
    K: TelemetrySink,
    K::Future: Send + 'static,
{
    async fn allow(&self, identifier: &str) -> Admission {
        DistributedRateLimiter::allow(self, identifier).await
    }

    fn limit(&self) -> f64 {
        self.config.tunables.capacity()
    }
}
