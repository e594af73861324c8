//! Rate limiting primitives.
//!
//! This module provides the building blocks for admission control:
//! - [`RateLimiter`]: the single entry point, one `allow` per inbound request.
//! - [`LocalRateLimiter`]: buckets held in process memory.
//! - [`DistributedRateLimiter`]: buckets held in a shared store, updated atomically.
//! - [`AdmissionLayer`]: Tower middleware that turns a rejection into a 429-style error.
//!
//! # Architecture
//!
//! - **Middleware**: `AdmissionLayer` wraps your service. It doesn't know *how* limiting
//!   works, only that it should ask a `RateLimiter` once per request.
//! - **Logic**: [`refill_and_consume`](crate::bucket::refill_and_consume) handles the math
//!   for every limiter.
//! - **Storage**: [`AtomicBucketStore`] executes the whole read-refill-consume-write cycle
//!   in one atomic step, enabling in-memory or distributed backends (e.g., Redis).

use crate::bucket::Admission;

pub mod distributed;
pub mod local;
pub mod middleware;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;

pub use distributed::{DistributedConfig, DistributedConfigBuilder, DistributedRateLimiter};
pub use local::{LocalRateLimiter, SweeperHandle};
pub use middleware::{peer_identifier, AdmissionLayer, AdmissionService, Admitted, Quota};
pub use store::{AtomicBucketStore, InMemoryBucketStore, ScriptRequest, StoreValue};

/// What the distributed limiter answers when its store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailurePolicy {
    /// Reject while the store is degraded; protects downstream capacity.
    #[default]
    FailClosed,
    /// Admit while the store is degraded; protects availability of the caller.
    FailOpen,
}

impl FailurePolicy {
    /// The admission handed out when the store cannot answer.
    pub fn degraded_admission(self) -> Admission {
        match self {
            FailurePolicy::FailClosed => Admission::reject(0.0),
            FailurePolicy::FailOpen => Admission::admit(0.0),
        }
    }
}

/// Core interface for admission decisions.
///
/// Implementations never fail: degraded backends resolve to an ordinary decision.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Decide whether one request from `identifier` may proceed.
    async fn allow(&self, identifier: &str) -> Admission;

    /// Configured bucket capacity, for limit headers.
    fn limit(&self) -> f64;
}
