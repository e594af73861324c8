#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tollgate
//!
//! Token-bucket admission control for async Rust: decide in bounded time whether a
//! request from a given caller may proceed.
//!
//! ## Features
//!
//! - **Local limiter** holding one bucket per identifier in process memory
//! - **Distributed limiter** running the whole refill/consume cycle as one atomic
//!   operation against a shared store (in-memory or Redis)
//! - **Fail-closed by default** when the store is unreachable, switchable at runtime
//! - **Idle eviction** for in-process buckets and idle expiry for stored ones
//! - **Tower middleware** that maps a rejection to a 429-style error and exposes quota headers
//!
//! ## Quick Start
//!
//! ```rust
//! use tollgate::{BucketConfig, LocalRateLimiter};
//!
//! let limiter = LocalRateLimiter::new(BucketConfig::new(5.0, 1.0).unwrap());
//! for _ in 0..5 {
//!     assert!(limiter.allow("203.0.113.7").allowed);
//! }
//! assert!(!limiter.allow("203.0.113.7").allowed);
//! ```

pub mod adaptive;
pub mod bucket;
pub mod clock;
#[cfg(feature = "serde")]
pub mod config;
pub mod error;
pub mod prelude;
pub mod rate_limit;
pub mod telemetry;

// Re-exports
pub use adaptive::DynamicConfig;
pub use bucket::{refill_and_consume, Admission, BucketConfig, BucketState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AdmissionError, ConfigError, StoreError};
pub use rate_limit::{
    AdmissionLayer, AtomicBucketStore, DistributedConfig, DistributedRateLimiter, FailurePolicy,
    InMemoryBucketStore, LocalRateLimiter, RateLimiter,
};
#[cfg(feature = "redis")]
pub use rate_limit::redis::RedisBucketStore;
