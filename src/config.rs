//! Deserializable limiter settings.
//!
//! `LimiterSettings` is the shape a host application reads from its own config
//! source (file, env, flags). Conversion validates, so a bad value fails at
//! startup rather than on a request.

use std::time::Duration;

use serde::Deserialize;

use crate::bucket::BucketConfig;
use crate::error::ConfigError;
use crate::rate_limit::{DistributedConfig, FailurePolicy, LocalRateLimiter};

/// Raw limiter settings.
///
/// ```
/// use tollgate::config::LimiterSettings;
/// let settings: LimiterSettings =
///     serde_json::from_str(r#"{ "capacity": 5, "refill_rate": 1 }"#).unwrap();
/// assert_eq!(settings.idle_ttl_secs, 60);
/// assert!(settings.bucket_config().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterSettings {
    /// Maximum burst size.
    pub capacity: f64,
    /// Tokens per second.
    pub refill_rate: f64,
    /// Store key namespace.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Idle expiry in seconds.
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    /// Store deadline in milliseconds.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// `fail_closed` or `fail_open`.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_key_prefix() -> String {
    DistributedConfig::DEFAULT_KEY_PREFIX.to_string()
}

fn default_idle_ttl_secs() -> u64 {
    DistributedConfig::DEFAULT_IDLE_TTL.as_secs()
}

fn default_deadline_ms() -> u64 {
    DistributedConfig::DEFAULT_DEADLINE.as_millis() as u64
}

impl LimiterSettings {
    /// Validated tunables.
    pub fn bucket_config(&self) -> Result<BucketConfig, ConfigError> {
        BucketConfig::new(self.capacity, self.refill_rate)
    }

    /// Validated distributed configuration.
    pub fn distributed_config(&self) -> Result<DistributedConfig, ConfigError> {
        DistributedConfig::builder(self.bucket_config()?)
            .key_prefix(self.key_prefix.clone())
            .idle_ttl(Duration::from_secs(self.idle_ttl_secs))
            .deadline(Duration::from_millis(self.deadline_ms))
            .failure_policy(self.failure_policy)
            .build()
    }

    /// An in-process limiter using these tunables.
    pub fn local_limiter(&self) -> Result<LocalRateLimiter, ConfigError> {
        Ok(LocalRateLimiter::new(self.bucket_config()?))
    }
}
